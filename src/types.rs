//! Core data types for uatree-rs
//!
//! This module contains the value-like structures that flow through one poll
//! cycle. None of them outlive the cycle that created them.
//!
//! # Main Types
//!
//! - [`Variant`] - A scalar (or array) value read from the server
//! - [`ResolutionTarget`] - One leaf to resolve: where it goes and how to address it
//! - [`FlatRow`] - One `(tsp, variable, value)` row for tabular sinks
//! - [`CycleStats`] - Timing and counts for a single cycle
//!
//! # Timestamps
//!
//! Timestamps are ISO-8601 strings carrying the local UTC offset, produced by
//! [`local_timestamp`]. They are strings rather than `DateTime` values because
//! sinks store and forward them verbatim.

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value read from a remote variable.
///
/// Serialized untagged, so a row's `value` field is a plain JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Variant {
    /// Server returned an empty value
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Variant>),
}

impl Variant {
    /// Convert a JSON value into a variant. Objects have no variant form.
    pub fn from_json(value: &serde_json::Value) -> Option<Variant> {
        use serde_json::Value;
        Some(match value {
            Value::Null => Variant::Null,
            Value::Bool(b) => Variant::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Variant::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Variant::UInt(u)
                } else {
                    Variant::Float(n.as_f64()?)
                }
            }
            Value::String(s) => Variant::String(s.clone()),
            Value::Array(items) => Variant::Array(
                items
                    .iter()
                    .map(Variant::from_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Value::Object(_) => return None,
        })
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Int(i) => Some(*i as f64),
            Variant::UInt(u) => Some(*u as f64),
            Variant::Float(f) => Some(*f),
            Variant::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => Ok(()),
            Variant::Bool(b) => write!(f, "{}", b),
            Variant::Int(i) => write!(f, "{}", i),
            Variant::UInt(u) => write!(f, "{}", u),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::String(s) => f.write_str(s),
            Variant::Array(_) => {
                let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
        }
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Float(v)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Self {
        Variant::Int(v)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Bool(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

/// How a read value is placed at its tree location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafLayout {
    /// The value replaces the leaf directly (node-set mode)
    Direct,
    /// The leaf becomes `{display_name: value}` (schema mode)
    Named,
}

/// One unit of resolution work for a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionTarget {
    /// Where in the output tree the value belongs
    pub tree_location: Vec<String>,
    /// Segments to resolve below the root container
    pub remote_path: Vec<String>,
    /// The leaf's declared remote variable name
    pub display_name: String,
    /// Placement of the value at `tree_location`
    pub layout: LeafLayout,
}

impl ResolutionTarget {
    /// Dot-joined tree location, used in logs and flattened rows
    pub fn location_string(&self) -> String {
        self.tree_location.join(".")
    }

    /// Dot-joined remote path
    pub fn remote_path_string(&self) -> String {
        self.remote_path.join(".")
    }
}

/// One flattened row: timestamp, dotted variable path, value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    pub tsp: String,
    pub variable: String,
    pub value: Variant,
}

impl FlatRow {
    pub fn new(tsp: impl Into<String>, variable: impl Into<String>, value: Variant) -> Self {
        Self {
            tsp: tsp.into(),
            variable: variable.into(),
            value,
        }
    }
}

/// Statistics for a single resolve/read cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleStats {
    /// Targets that resolved to a handle
    pub resolved: usize,
    /// Targets that failed resolution and were left unset
    pub unresolved: usize,
    /// Wall time spent resolving, in microseconds
    pub resolve_time_us: u64,
    /// Wall time spent in the batched read, in microseconds
    pub read_time_us: u64,
    /// Number of batched read calls issued (0 or 1)
    pub read_calls: u32,
}

impl CycleStats {
    pub fn total_targets(&self) -> usize {
        self.resolved + self.unresolved
    }
}

/// Current local time as an offset-aware ISO-8601 string.
pub fn local_timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
