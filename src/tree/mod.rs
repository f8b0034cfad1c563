//! Ordered value trees and the operations shared by both input modes.
//!
//! A [`ValueTree`] is what one cycle produces: interior [`Branch`]es keyed by
//! string, leaves holding a read [`Variant`], and the [`ValueTree::Unset`]
//! sentinel for leaves whose value is not (yet) known. Branches keep insertion
//! order so output is deterministic from cycle to cycle.
//!
//! ## Submodules
//!
//! - [`schema`] - the user-authored schema and its pre-order walk
//! - [`populate`] - substitutes read values into a tree shape
//! - [`flatten`] - projects a populated tree into `(tsp, variable, value)` rows
//!
//! ## Merge semantics
//!
//! [`merge`] combines two branches key by key. Where both sides hold branches
//! it recurses; anywhere else the overlay wins (last write wins). A leaf in
//! the base that collides with a leaf in the overlay is silently replaced, so
//! callers that must not lose data check for collisions first.
//!
//! ```text
//! {"M": {"Tank": {"T": 65.3}}}  +  {"M": {"Tank": {"P": 2.5}}}
//!   = {"M": {"Tank": {"T": 65.3, "P": 2.5}}}
//! ```

pub mod flatten;
pub mod populate;
pub mod schema;

pub use flatten::Flattener;
pub use populate::populate;
pub use schema::{walk, Schema, SchemaNode};

use crate::error::{Result, UaTreeError};
use crate::types::Variant;
use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};

/// A node of a populated (or partially populated) tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueTree {
    /// Interior node
    Branch(Branch),
    /// A value read from the server
    Value(Variant),
    /// A leaf with no value: not resolved, not read, or not yet populated
    Unset,
}

impl ValueTree {
    /// Build a tree from arbitrary JSON: objects become branches, everything
    /// else becomes a value leaf.
    pub fn from_json(value: &serde_json::Value) -> ValueTree {
        match value {
            serde_json::Value::Object(map) => ValueTree::Branch(
                map.iter()
                    .map(|(k, v)| (k.clone(), ValueTree::from_json(v)))
                    .collect(),
            ),
            // Arrays holding objects have no variant form and collapse to null
            other => ValueTree::Value(Variant::from_json(other).unwrap_or_default()),
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, ValueTree::Unset)
    }

    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            ValueTree::Branch(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Variant> {
        match self {
            ValueTree::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Follow `path` from this node. An empty path returns `self`.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&ValueTree> {
        let mut current = self;
        for key in path {
            current = current.as_branch()?.get(key.as_ref())?;
        }
        Some(current)
    }

    /// Number of non-branch nodes (values and unset sentinels) below this node
    pub fn leaf_count(&self) -> usize {
        match self {
            ValueTree::Branch(b) => b.leaf_count(),
            _ => 1,
        }
    }

    /// Convert to a JSON value; unset leaves become `null`
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ValueTree::Branch(b) => b.to_json(),
            ValueTree::Value(v) => serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
            ValueTree::Unset => serde_json::Value::Null,
        }
    }
}

impl From<Variant> for ValueTree {
    fn from(v: Variant) -> Self {
        ValueTree::Value(v)
    }
}

impl From<Branch> for ValueTree {
    fn from(b: Branch) -> Self {
        ValueTree::Branch(b)
    }
}

impl Serialize for ValueTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ValueTree::Branch(b) => b.serialize(serializer),
            ValueTree::Value(v) => v.serialize(serializer),
            ValueTree::Unset => serializer.serialize_none(),
        }
    }
}

/// An interior node: string keys in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Branch {
    entries: Vec<(String, ValueTree)>,
}

impl Branch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ValueTree> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ValueTree> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: ValueTree) -> Option<ValueTree> {
        let key = key.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// The child branch at `key`, created if missing.
    ///
    /// Returns `None` when `key` holds a read value; an unset leaf is
    /// replaced by an empty branch.
    pub fn branch_mut(&mut self, key: &str) -> Option<&mut Branch> {
        if !self.contains_key(key) {
            self.entries.push((key.to_string(), ValueTree::Branch(Branch::new())));
        }
        let slot = self.get_mut(key)?;
        if slot.is_unset() {
            *slot = ValueTree::Branch(Branch::new());
        }
        match slot {
            ValueTree::Branch(b) => Some(b),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ValueTree)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn leaf_count(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.leaf_count()).sum()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, ValueTree)> for Branch {
    fn from_iter<I: IntoIterator<Item = (String, ValueTree)>>(iter: I) -> Self {
        let mut branch = Branch::new();
        for (k, v) in iter {
            branch.insert(k, v);
        }
        branch
    }
}

impl IntoIterator for Branch {
    type Item = (String, ValueTree);
    type IntoIter = std::vec::IntoIter<(String, ValueTree)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for Branch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Build a single-path tree: `["M", "Tank", "T"], 65.3` gives
/// `{"M": {"Tank": {"T": 65.3}}}`.
pub fn build_nested<S: AsRef<str>>(path: &[S], leaf: ValueTree) -> Result<Branch> {
    let Some((last, parents)) = path.split_last() else {
        return Err(UaTreeError::config("cannot build a tree from an empty path"));
    };
    let mut node = Branch::new();
    node.insert(last.as_ref(), leaf);
    for key in parents.iter().rev() {
        let mut parent = Branch::new();
        parent.insert(key.as_ref(), ValueTree::Branch(node));
        node = parent;
    }
    Ok(node)
}

/// Deep merge, last write wins on anything that is not branch-vs-branch.
pub fn merge(mut base: Branch, overlay: Branch) -> Branch {
    for (key, incoming) in overlay {
        let merged = match (base.get_mut(&key), incoming) {
            (Some(ValueTree::Branch(existing)), ValueTree::Branch(incoming)) => {
                ValueTree::Branch(merge(std::mem::take(existing), incoming))
            }
            (_, incoming) => incoming,
        };
        base.insert(key, merged);
    }
    base
}

/// The output of one cycle: a timestamp and a tree congruent to the input shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulatedTree {
    /// Offset-aware ISO-8601 timestamp taken when the cycle started
    pub tsp: String,
    pub data: Branch,
}

impl PopulatedTree {
    pub fn new(tsp: impl Into<String>, data: Branch) -> Self {
        Self {
            tsp: tsp.into(),
            data,
        }
    }

    /// Value at a tree location, if it was populated
    pub fn value_at<S: AsRef<str>>(&self, path: &[S]) -> Option<&ValueTree> {
        let (first, rest) = path.split_first()?;
        self.data.get(first.as_ref())?.get_path(rest)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "tsp": self.tsp, "data": self.data.to_json() })
    }
}

impl Serialize for PopulatedTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("PopulatedTree", 2)?;
        s.serialize_field("tsp", &self.tsp)?;
        s.serialize_field("data", &self.data)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn branch(value: serde_json::Value) -> Branch {
        match ValueTree::from_json(&value) {
            ValueTree::Branch(b) => b,
            other => panic!("expected branch, got {:?}", other),
        }
    }

    #[test]
    fn test_build_nested_single_level() {
        let tree = build_nested(&["Temperature"], Variant::Float(42.5).into()).unwrap();
        assert_eq!(tree.to_json(), json!({"Temperature": 42.5}));
    }

    #[test]
    fn test_build_nested_multi_level() {
        let tree =
            build_nested(&["Machine1", "Tank", "Temperature"], Variant::Float(65.3).into()).unwrap();
        assert_eq!(
            tree.to_json(),
            json!({"Machine1": {"Tank": {"Temperature": 65.3}}})
        );
    }

    #[test]
    fn test_build_nested_empty_path_is_error() {
        let empty: [&str; 0] = [];
        assert!(build_nested(&empty, ValueTree::Unset).is_err());
    }

    #[test]
    fn test_merge_same_branch() {
        let merged = merge(
            branch(json!({"M": {"Tank": {"T": 65.3}}})),
            branch(json!({"M": {"Tank": {"P": 2.5}}})),
        );
        assert_eq!(merged.to_json(), json!({"M": {"Tank": {"T": 65.3, "P": 2.5}}}));
    }

    #[test]
    fn test_merge_different_branches() {
        let merged = merge(
            branch(json!({"Machine1": {"Tank": {"Temperature": 65.3}}})),
            branch(json!({"Machine1": {"Motor": {"Speed": 1450.0}}})),
        );
        assert_eq!(
            merged.to_json(),
            json!({"Machine1": {"Tank": {"Temperature": 65.3}, "Motor": {"Speed": 1450.0}}})
        );
    }

    #[test]
    fn test_merge_overwrites_leaves() {
        let merged = merge(branch(json!({"status": "old"})), branch(json!({"status": "new"})));
        assert_eq!(merged.to_json(), json!({"status": "new"}));
    }

    #[test]
    fn test_merge_leaf_replaces_branch() {
        let merged = merge(branch(json!({"a": {"b": 1}})), branch(json!({"a": 2})));
        assert_eq!(merged.to_json(), json!({"a": 2}));
    }

    #[test]
    fn test_insert_keeps_position() {
        let mut b = Branch::new();
        b.insert("x", Variant::Int(1).into());
        b.insert("y", Variant::Int(2).into());
        b.insert("x", Variant::Int(3).into());
        let keys: Vec<_> = b.keys().cloned().collect();
        assert_eq!(keys, vec!["x", "y"]);
        assert_eq!(b.get("x").and_then(|v| v.as_value()), Some(&Variant::Int(3)));
    }

    #[test]
    fn test_branch_mut_refuses_to_descend_through_values() {
        let mut b = Branch::new();
        b.insert("v", Variant::Int(1).into());
        b.insert("u", ValueTree::Unset);
        assert!(b.branch_mut("v").is_none());
        assert!(b.branch_mut("u").is_some());
        assert!(b.branch_mut("new").is_some());
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn test_serialization_preserves_order_and_unset() {
        let mut b = Branch::new();
        b.insert("z", Variant::Int(1).into());
        b.insert("a", ValueTree::Unset);
        let text = serde_json::to_string(&b).unwrap();
        assert_eq!(text, r#"{"z":1,"a":null}"#);
    }

    #[test]
    fn test_populated_tree_shape() {
        let tree = PopulatedTree::new("T", branch(json!({"Tank": {"Temperature": 23.3}})));
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({"tsp": "T", "data": {"Tank": {"Temperature": 23.3}}})
        );
        assert_eq!(
            tree.value_at(&["Tank", "Temperature"]).and_then(|v| v.as_value()),
            Some(&Variant::Float(23.3))
        );
        assert!(tree.value_at(&["Tank", "Missing"]).is_none());
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_merge_of_disjoint_keys_keeps_everything(
            left in prop::collection::btree_map("[a-m]{1,4}", any::<i64>(), 0..10),
            right in prop::collection::btree_map("[n-z]{1,4}", any::<i64>(), 0..10),
        ) {
            let l: Branch = left.iter().map(|(k, v)| (k.clone(), Variant::Int(*v).into())).collect();
            let r: Branch = right.iter().map(|(k, v)| (k.clone(), Variant::Int(*v).into())).collect();
            let merged = merge(l, r);
            prop_assert_eq!(merged.len(), left.len() + right.len());
            for (k, v) in left.iter().chain(right.iter()) {
                prop_assert_eq!(merged.get(k).and_then(|t| t.as_value()), Some(&Variant::Int(*v)));
            }
        }
    }
}
