//! Output sinks
//!
//! A cycle publishes its result through a [`Sink`]: one call per flat row,
//! one call per tree, then a flush. A sink that does not accept trees gets
//! each leaf exactly once as a row, whatever the output mode. Every call carries the table name and
//! the key qualifiers (the namespace name by default).
//!
//! - [`JsonLinesSink`] - one JSON object per line to stdout or a file
//! - [`CsvFileSink`] - rotating CSV files
//! - [`MemorySink`] - keeps everything in memory, for tests and dry runs

pub mod csv_file;
pub mod json_lines;
pub mod memory;

pub use csv_file::CsvFileSink;
pub use json_lines::JsonLinesSink;
pub use memory::{MemorySink, PublishedRow, PublishedTree};

use crate::config::SinkConfig;
use crate::error::{Result, ResultExt, UaTreeError};
use crate::tree::PopulatedTree;
use crate::types::FlatRow;
use std::fs::OpenOptions;

/// Destination for cycle output
#[cfg_attr(test, mockall::automock)]
pub trait Sink: Send {
    fn publish_row(&mut self, table: &str, keys: &[String], row: &FlatRow) -> Result<()>;

    fn publish_tree(&mut self, table: &str, keys: &[String], tree: &PopulatedTree) -> Result<()>;

    /// Whether whole trees are stored. Row-oriented sinks return `false` and
    /// receive the flattened rows of a tree instead.
    fn accepts_trees(&self) -> bool {
        true
    }

    /// Push buffered output down; called once per cycle
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Finish pending files; called once on shutdown
    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn publish_row(&mut self, table: &str, keys: &[String], row: &FlatRow) -> Result<()> {
        (**self).publish_row(table, keys, row)
    }

    fn publish_tree(&mut self, table: &str, keys: &[String], tree: &PopulatedTree) -> Result<()> {
        (**self).publish_tree(table, keys, tree)
    }

    fn accepts_trees(&self) -> bool {
        (**self).accepts_trees()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Build the sink described by `config`
pub fn build_sink(config: &SinkConfig) -> Result<Box<dyn Sink>> {
    match config {
        SinkConfig::Stdout => Ok(Box::new(JsonLinesSink::new(std::io::stdout()))),
        SinkConfig::JsonLines { path } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(UaTreeError::from)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(UaTreeError::from)
                .with_context(|| format!("Failed to open {:?}", path))?;
            tracing::info!("Writing JSON lines to {:?}", path);
            Ok(Box::new(JsonLinesSink::new(std::io::BufWriter::new(file))))
        }
        SinkConfig::Csv(csv) => Ok(Box::new(CsvFileSink::new(csv)?)),
    }
}
