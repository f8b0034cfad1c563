//! Detection of the variables document.
//!
//! The same configuration value may hold either input mode:
//!
//! | JSON                                  | Mode                                 |
//! |---------------------------------------|--------------------------------------|
//! | array                                 | node set                             |
//! | object with `NodeClass`               | node set with a single descriptor    |
//! | object with `UAVariables`             | node set, `NamespaceUris[0]` wins    |
//! | any other object                      | schema                               |

use crate::error::{Result, UaTreeError};
use crate::nodeset::VariableDescriptor;
use crate::tree::Schema;
use serde::Deserialize;
use serde_json::Value;

/// A parsed variables document
#[derive(Debug, Clone, PartialEq)]
pub enum VariablesDocument {
    Schema(Schema),
    NodeSet {
        descriptors: Vec<VariableDescriptor>,
        /// Namespace name carried by an exported node set
        namespace_override: Option<String>,
    },
}

impl VariablesDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| UaTreeError::config(format!("variables document is not valid JSON: {}", e)))?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(VariablesDocument::NodeSet {
                descriptors: parse_descriptors(items)?,
                namespace_override: None,
            }),
            Value::Object(map) if map.contains_key("NodeClass") => Ok(VariablesDocument::NodeSet {
                descriptors: vec![parse_descriptor(0, value)?],
                namespace_override: None,
            }),
            Value::Object(map) if map.contains_key("UAVariables") => {
                let Some(Value::Array(items)) = map.get("UAVariables") else {
                    return Err(UaTreeError::config("'UAVariables' must be an array"));
                };
                let namespace_override = map
                    .get("NamespaceUris")
                    .and_then(Value::as_array)
                    .and_then(|uris| uris.first())
                    .and_then(Value::as_str)
                    .filter(|uri| !uri.is_empty())
                    .map(str::to_string);
                Ok(VariablesDocument::NodeSet {
                    descriptors: parse_descriptors(items)?,
                    namespace_override,
                })
            }
            Value::Object(_) => Ok(VariablesDocument::Schema(Schema::from_json(value)?)),
            other => Err(UaTreeError::config(format!(
                "variables document must be a JSON object or array, found {}",
                json_kind(other)
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VariablesDocument::Schema(_) => "schema",
            VariablesDocument::NodeSet { .. } => "node set",
        }
    }

    pub fn namespace_override(&self) -> Option<&str> {
        match self {
            VariablesDocument::NodeSet {
                namespace_override: Some(ns),
                ..
            } => Some(ns),
            _ => None,
        }
    }
}

fn parse_descriptors(items: &[Value]) -> Result<Vec<VariableDescriptor>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_descriptor(index, item))
        .collect()
}

fn parse_descriptor(index: usize, item: &Value) -> Result<VariableDescriptor> {
    if !item.is_object() {
        return Err(UaTreeError::config(format!(
            "node-set entry {} must be an object, found {}",
            index,
            json_kind(item)
        )));
    }
    VariableDescriptor::deserialize(item)
        .map_err(|e| UaTreeError::config(format!("node-set entry {} is invalid: {}", index, e)))
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

/// Normalize a JSON document passed through an environment variable.
///
/// Literal `\n` sequences become line breaks, every line is trimmed, empty
/// lines are dropped and the rest is joined without a separator.
pub fn clean_multiline_env_var(value: &str) -> String {
    value
        .replace("\\n", "\n")
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}
