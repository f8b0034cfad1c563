//! NodeId parsing for node-set descriptors.
//!
//! Two encodings are accepted:
//!
//! - string form: `ns=2;s=Tank.Temperature`, or `i=85` for namespace 0
//! - structured form: `{"Namespace": 2, "IdType": "String", "Id": "Tank.Temperature"}`
//!
//! The namespace index carried by a NodeId is advisory. Server-assigned
//! indices are session specific, so addressing always uses the index the
//! connection resolved at connect time.

use crate::error::{Result, UaTreeError};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// Identifier type tag of a NodeId
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierType {
    /// `i=`
    Numeric,
    /// `s=`
    String,
    /// `g=`
    Guid,
    /// `b=`
    Opaque,
}

impl IdentifierType {
    pub fn tag(&self) -> char {
        match self {
            IdentifierType::Numeric => 'i',
            IdentifierType::String => 's',
            IdentifierType::Guid => 'g',
            IdentifierType::Opaque => 'b',
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "i" => Some(IdentifierType::Numeric),
            "s" => Some(IdentifierType::String),
            "g" => Some(IdentifierType::Guid),
            "b" => Some(IdentifierType::Opaque),
            _ => None,
        }
    }

    /// Names used by structured NodeIds, including the numeric codes of the
    /// OPC UA JSON encoding (0 numeric, 1 string, 2 guid, 3 opaque)
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Numeric" | "Integer" | "0" => Some(IdentifierType::Numeric),
            "String" | "1" => Some(IdentifierType::String),
            "Guid" | "2" => Some(IdentifierType::Guid),
            "Opaque" | "ByteString" | "3" => Some(IdentifierType::Opaque),
            other => Self::from_tag(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeId {
    pub namespace: u16,
    pub id_type: IdentifierType,
    pub identifier: String,
}

impl NodeId {
    pub fn new(namespace: u16, id_type: IdentifierType, identifier: impl Into<String>) -> Self {
        Self {
            namespace,
            id_type,
            identifier: identifier.into(),
        }
    }

    /// Split a dotted string identifier into path segments.
    ///
    /// `s=Machine1.Tank.Temperature` gives `["Machine1", "Tank", "Temperature"]`.
    /// Non-string identifiers, undotted identifiers and identifiers with empty
    /// segments (`A..B`, `.A`) carry no path.
    pub fn path_segments(&self) -> Option<Vec<String>> {
        if self.id_type != IdentifierType::String || !self.identifier.contains('.') {
            return None;
        }
        let segments: Vec<String> = self.identifier.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(segments)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ns={};{}={}",
            self.namespace,
            self.id_type.tag(),
            self.identifier
        )
    }
}

impl FromStr for NodeId {
    type Err = UaTreeError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let (namespace, rest) = match text.strip_prefix("ns=") {
            Some(after) => {
                let (ns, rest) = after.split_once(';').ok_or_else(|| {
                    UaTreeError::config(format!("NodeId '{}' is missing ';' after the namespace", s))
                })?;
                let ns = ns.parse::<u16>().map_err(|_| {
                    UaTreeError::config(format!("NodeId '{}' has an invalid namespace index", s))
                })?;
                (ns, rest)
            }
            None => (0, text),
        };

        let (tag, identifier) = rest.split_once('=').ok_or_else(|| {
            UaTreeError::config(format!("NodeId '{}' is missing an identifier type", s))
        })?;
        let id_type = IdentifierType::from_tag(tag).ok_or_else(|| {
            UaTreeError::config(format!("NodeId '{}' has unknown identifier type '{}'", s, tag))
        })?;
        if identifier.is_empty() {
            return Err(UaTreeError::config(format!("NodeId '{}' has an empty identifier", s)));
        }
        if id_type == IdentifierType::Numeric && identifier.parse::<u32>().is_err() {
            return Err(UaTreeError::config(format!(
                "NodeId '{}' has a non-numeric identifier for type 'i'",
                s
            )));
        }

        Ok(NodeId::new(namespace, id_type, identifier))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdType {
    Number(u8),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNodeId {
    Text(String),
    Structured {
        #[serde(rename = "Namespace", default)]
        namespace: u16,
        #[serde(rename = "IdType", default)]
        id_type: Option<RawIdType>,
        #[serde(rename = "Id")]
        id: RawIdentifier,
    },
}

impl TryFrom<RawNodeId> for NodeId {
    type Error = UaTreeError;

    fn try_from(raw: RawNodeId) -> Result<Self> {
        match raw {
            RawNodeId::Text(text) => text.parse(),
            RawNodeId::Structured {
                namespace,
                id_type,
                id,
            } => {
                let id_type = match id_type {
                    Some(RawIdType::Number(code)) => IdentifierType::from_name(&code.to_string()),
                    Some(RawIdType::Text(name)) => IdentifierType::from_name(&name),
                    None => Some(match id {
                        RawIdentifier::Number(_) => IdentifierType::Numeric,
                        RawIdentifier::Text(_) => IdentifierType::String,
                    }),
                }
                .ok_or_else(|| UaTreeError::config("structured NodeId has an unknown IdType"))?;
                let identifier = match id {
                    RawIdentifier::Number(n) => n.to_string(),
                    RawIdentifier::Text(s) => s,
                };
                Ok(NodeId::new(namespace, id_type, identifier))
            }
        }
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawNodeId::deserialize(deserializer)?;
        NodeId::try_from(raw).map_err(serde::de::Error::custom)
    }
}
