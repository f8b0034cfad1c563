//! Projects populated trees into flat rows for tabular sinks.
//!
//! One row per leaf, pre-order, keys joined with `.`:
//!
//! ```text
//! {tsp: T, data: {"Tank": {"Temperature": 23.3}}}
//!   -> [{tsp: T, variable: "Tank.Temperature", value: 23.3}]
//! ```
//!
//! Values pass through with their type intact. Unset leaves produce no row
//! unless [`Flattener::with_unset_rows`] is enabled, in which case they are
//! emitted with a `null` value.

use super::{Branch, PopulatedTree, ValueTree};
use crate::error::{Result, UaTreeError};
use crate::types::{local_timestamp, FlatRow, Variant};
use serde_json::Value;

/// Reserved top-level key holding the timestamp in tree documents
pub const TIMESTAMP_KEY: &str = "tsp";

/// Reserved top-level key holding the tree in tree documents
pub const DATA_KEY: &str = "data";

/// Separator used to join tree keys into a variable path
pub const PATH_SEPARATOR: &str = ".";

#[derive(Debug, Clone, Copy, Default)]
pub struct Flattener {
    include_unset: bool,
}

impl Flattener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a `null` row for every unset leaf instead of skipping it
    pub fn with_unset_rows(mut self, include: bool) -> Self {
        self.include_unset = include;
        self
    }

    pub fn flatten(&self, tree: &PopulatedTree) -> Vec<FlatRow> {
        self.flatten_branch(&tree.data, &tree.tsp)
    }

    pub fn flatten_branch(&self, branch: &Branch, tsp: &str) -> Vec<FlatRow> {
        let mut rows = Vec::with_capacity(branch.leaf_count());
        let mut path = Vec::new();
        self.visit(branch, tsp, &mut path, &mut rows);
        rows
    }

    /// Flatten an arbitrary JSON tree document.
    ///
    /// A top-level `tsp` string is hoisted into every row, a top-level `data`
    /// object is unwrapped, and a missing timestamp is taken from the local
    /// clock.
    pub fn flatten_json(&self, document: &Value) -> Result<Vec<FlatRow>> {
        let Value::Object(map) = document else {
            return Err(UaTreeError::config(
                "tree document must be a JSON object".to_string(),
            ));
        };

        let tsp = match map.get(TIMESTAMP_KEY) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(UaTreeError::config(format!(
                    "'{}' must be a string, found {}",
                    TIMESTAMP_KEY, other
                )))
            }
            None => local_timestamp(),
        };

        let body: Branch = match map.get(DATA_KEY) {
            Some(data @ Value::Object(_)) => match ValueTree::from_json(data) {
                ValueTree::Branch(b) => b,
                _ => Branch::new(),
            },
            _ => map
                .iter()
                .filter(|(k, _)| k.as_str() != TIMESTAMP_KEY)
                .map(|(k, v)| (k.clone(), ValueTree::from_json(v)))
                .collect(),
        };

        Ok(self.flatten_branch(&body, &tsp))
    }

    fn visit<'a>(
        &self,
        branch: &'a Branch,
        tsp: &str,
        path: &mut Vec<&'a str>,
        rows: &mut Vec<FlatRow>,
    ) {
        for (key, node) in branch.iter() {
            path.push(key.as_str());
            match node {
                ValueTree::Branch(child) => self.visit(child, tsp, path, rows),
                ValueTree::Value(value) => {
                    rows.push(FlatRow::new(tsp, path.join(PATH_SEPARATOR), value.clone()))
                }
                ValueTree::Unset if self.include_unset => {
                    rows.push(FlatRow::new(tsp, path.join(PATH_SEPARATOR), Variant::Null))
                }
                ValueTree::Unset => {}
            }
            path.pop();
        }
    }
}
