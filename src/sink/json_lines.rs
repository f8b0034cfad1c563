//! JSON lines sink.
//!
//! Rows and trees are written one object per line:
//!
//! ```text
//! {"table":"opcuadata","keys":["example:ironflock:com"],"tsp":"...","variable":"Tank.Temperature","value":23.3}
//! {"table":"opcuadata","keys":["example:ironflock:com"],"tsp":"...","data":{"Tank":{"Temperature":23.3}}}
//! ```

use super::Sink;
use crate::error::Result;
use crate::tree::{Branch, PopulatedTree};
use crate::types::{FlatRow, Variant};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct RowRecord<'a> {
    table: &'a str,
    keys: &'a [String],
    tsp: &'a str,
    variable: &'a str,
    value: &'a Variant,
}

#[derive(Serialize)]
struct TreeRecord<'a> {
    table: &'a str,
    keys: &'a [String],
    tsp: &'a str,
    data: &'a Branch,
}

pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    lines_written: u64,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            lines_written: 0,
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.lines_written += 1;
        Ok(())
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn publish_row(&mut self, table: &str, keys: &[String], row: &FlatRow) -> Result<()> {
        self.write_line(&RowRecord {
            table,
            keys,
            tsp: &row.tsp,
            variable: &row.variable,
            value: &row.value,
        })
    }

    fn publish_tree(&mut self, table: &str, keys: &[String], tree: &PopulatedTree) -> Result<()> {
        self.write_line(&TreeRecord {
            table,
            keys,
            tsp: &tree.tsp,
            data: &tree.data,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ValueTree;
    use serde_json::{json, Value};

    fn keys() -> Vec<String> {
        vec!["example:ironflock:com".to_string()]
    }

    #[test]
    fn test_row_line() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish_row(
            "opcuadata",
            &keys(),
            &FlatRow::new("T", "Tank.Temperature", Variant::Float(23.3)),
        )
        .unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let line: Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(
            line,
            json!({
                "table": "opcuadata",
                "keys": ["example:ironflock:com"],
                "tsp": "T",
                "variable": "Tank.Temperature",
                "value": 23.3
            })
        );
    }

    #[test]
    fn test_tree_line_keeps_unset_as_null() {
        let mut data = Branch::new();
        data.insert("Tank", ValueTree::Unset);
        let tree = PopulatedTree::new("T", data);

        let mut sink = JsonLinesSink::new(Vec::new());
        sink.publish_tree("opcuadata", &keys(), &tree).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.lines_written(), 1);

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let line: Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(line["data"], json!({"Tank": null}));
        assert_eq!(line["tsp"], "T");
    }
}
