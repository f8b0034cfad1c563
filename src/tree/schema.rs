//! User-authored schemas and the pre-order schema walk.
//!
//! A schema maps an output tree shape onto remote variable names:
//!
//! ```text
//! {
//!   "Tank": "Temperature",            leaf: read Objects/Tank/Temperature
//!   "Machine": { "Status": "Voltage" } interior, then leaf
//! }
//! ```
//!
//! The JSON document is validated once by [`Schema::from_json`]; after that
//! the leaf/interior distinction is carried by [`SchemaNode`] and the walk
//! itself cannot fail.

use super::{Branch, ValueTree};
use crate::error::{Result, UaTreeError};
use crate::types::{LeafLayout, ResolutionTarget};
use serde_json::Value;

/// One node below the schema root.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// Further nesting, in document order
    Interior(Vec<(String, SchemaNode)>),
    /// Name of the remote variable to read at this location
    Leaf(String),
}

/// A validated schema. The root is always an interior node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    entries: Vec<(String, SchemaNode)>,
}

impl Schema {
    pub fn new(entries: Vec<(String, SchemaNode)>) -> Self {
        Self { entries }
    }

    /// Parse schema text
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| UaTreeError::config(format!("schema is not valid JSON: {}", e)))?;
        Self::from_json(&value)
    }

    /// Validate a JSON document as a schema.
    ///
    /// Every value must be an object (interior) or a non-empty string (leaf);
    /// anything else is rejected with the offending location.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, child) in map {
                    entries.push((key.clone(), parse_node(child, &[key.as_str()])?));
                }
                Ok(Self { entries })
            }
            other => Err(UaTreeError::config(format!(
                "schema root must be an object, found {}",
                json_kind(other)
            ))),
        }
    }

    pub fn entries(&self) -> &[(String, SchemaNode)] {
        &self.entries
    }

    pub fn leaf_count(&self) -> usize {
        self.entries.iter().map(|(_, n)| n.leaf_count()).sum()
    }

    /// Copy of the schema shape with every leaf replaced by the unset sentinel
    pub fn skeleton(&self) -> Branch {
        skeleton_of(&self.entries)
    }
}

impl SchemaNode {
    pub fn leaf_count(&self) -> usize {
        match self {
            SchemaNode::Leaf(_) => 1,
            SchemaNode::Interior(children) => children.iter().map(|(_, n)| n.leaf_count()).sum(),
        }
    }
}

fn parse_node(value: &Value, location: &[&str]) -> Result<SchemaNode> {
    match value {
        Value::String(name) if name.is_empty() => Err(UaTreeError::config(format!(
            "schema leaf at '{}' has an empty variable name",
            location.join(".")
        ))),
        Value::String(name) => Ok(SchemaNode::Leaf(name.clone())),
        Value::Object(map) => {
            let mut children = Vec::with_capacity(map.len());
            for (key, child) in map {
                let mut child_location = location.to_vec();
                child_location.push(key.as_str());
                children.push((key.clone(), parse_node(child, &child_location)?));
            }
            Ok(SchemaNode::Interior(children))
        }
        other => Err(UaTreeError::config(format!(
            "schema value at '{}' must be an object or a variable name string, found {}",
            location.join("."),
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn skeleton_of(entries: &[(String, SchemaNode)]) -> Branch {
    entries
        .iter()
        .map(|(key, node)| {
            let copy = match node {
                SchemaNode::Leaf(_) => ValueTree::Unset,
                SchemaNode::Interior(children) => ValueTree::Branch(skeleton_of(children)),
            };
            (key.clone(), copy)
        })
        .collect()
}

/// Flatten a schema into resolution targets, in pre-order.
///
/// For a leaf `key: "Name"` under `prefix`, the tree location is
/// `prefix + [key]` and the remote path is `prefix + [key, "Name"]`.
pub fn walk(schema: &Schema) -> Vec<ResolutionTarget> {
    let mut targets = Vec::with_capacity(schema.leaf_count());
    walk_entries(&schema.entries, &mut Vec::new(), &mut targets);
    targets
}

fn walk_entries(
    entries: &[(String, SchemaNode)],
    prefix: &mut Vec<String>,
    out: &mut Vec<ResolutionTarget>,
) {
    for (key, node) in entries {
        prefix.push(key.clone());
        match node {
            SchemaNode::Interior(children) => walk_entries(children, prefix, out),
            SchemaNode::Leaf(variable) => {
                let mut remote_path = prefix.clone();
                remote_path.push(variable.clone());
                out.push(ResolutionTarget {
                    tree_location: prefix.clone(),
                    remote_path,
                    display_name: variable.clone(),
                    layout: LeafLayout::Named,
                });
            }
        }
        prefix.pop();
    }
}
