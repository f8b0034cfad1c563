//! In-memory sink.
//!
//! Clones share the same storage, so a test can hand one clone to a worker
//! and inspect what was published through another.

use super::Sink;
use crate::error::Result;
use crate::tree::PopulatedTree;
use crate::types::FlatRow;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRow {
    pub table: String,
    pub keys: Vec<String>,
    pub row: FlatRow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedTree {
    pub table: String,
    pub keys: Vec<String>,
    pub tree: PopulatedTree,
}

#[derive(Debug, Default)]
struct Published {
    rows: Vec<PublishedRow>,
    trees: Vec<PublishedTree>,
    flushes: usize,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Published>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Published> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn rows(&self) -> Vec<PublishedRow> {
        self.lock().rows.clone()
    }

    pub fn trees(&self) -> Vec<PublishedTree> {
        self.lock().trees.clone()
    }

    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn tree_count(&self) -> usize {
        self.lock().trees.len()
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// The most recently published tree
    pub fn last_tree(&self) -> Option<PopulatedTree> {
        self.lock().trees.last().map(|t| t.tree.clone())
    }

    pub fn clear(&self) {
        let mut published = self.lock();
        published.rows.clear();
        published.trees.clear();
        published.flushes = 0;
    }
}

impl Sink for MemorySink {
    fn publish_row(&mut self, table: &str, keys: &[String], row: &FlatRow) -> Result<()> {
        self.lock().rows.push(PublishedRow {
            table: table.to_string(),
            keys: keys.to_vec(),
            row: row.clone(),
        });
        Ok(())
    }

    fn publish_tree(&mut self, table: &str, keys: &[String], tree: &PopulatedTree) -> Result<()> {
        self.lock().trees.push(PublishedTree {
            table: table.to_string(),
            keys: keys.to_vec(),
            tree: tree.clone(),
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.lock().flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Branch;
    use crate::types::Variant;

    #[test]
    fn test_clones_share_storage() {
        let observer = MemorySink::new();
        let mut sink = observer.clone();
        sink.publish_row("t", &["ns".to_string()], &FlatRow::new("T", "A", Variant::Int(1)))
            .unwrap();
        sink.publish_tree("t", &[], &PopulatedTree::new("T", Branch::new()))
            .unwrap();
        sink.flush().unwrap();

        assert_eq!(observer.row_count(), 1);
        assert_eq!(observer.rows()[0].keys, vec!["ns"]);
        assert_eq!(observer.tree_count(), 1);
        assert_eq!(observer.flush_count(), 1);
        assert!(!observer.is_closed());

        sink.close().unwrap();
        assert!(observer.is_closed());

        observer.clear();
        assert_eq!(observer.row_count(), 0);
        assert!(observer.last_tree().is_none());
    }
}
