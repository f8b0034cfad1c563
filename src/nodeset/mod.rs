//! Node-set input mode.
//!
//! Instead of a hand-written schema, the variables to read can be given as a
//! flat list of self-describing descriptors, in the PascalCase shape exported
//! by OPC UA modelling tools:
//!
//! ```json
//! [
//!   {"NodeClass": "Variable", "NodeId": "ns=1;s=Machine1.Tank.Temperature", "BrowseName": "1:Temperature"},
//!   {"NodeClass": "Variable", "NodeId": "ns=2;i=1001", "BrowseName": "Status", "DisplayName": "Pump Status"}
//! ]
//! ```
//!
//! The tree shape is inferred from each descriptor by [`interpret`]; see
//! [`interpreter`] for the precedence rules.

pub mod interpreter;
pub mod node_id;

pub use interpreter::{interpret, Interpretation, LocationSource};
pub use node_id::{IdentifierType, NodeId};

use serde::Deserialize;

/// Display name, either plain text or a localized text object
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    Plain(String),
    Localized {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "Locale", default)]
        locale: Option<String>,
    },
}

impl LocalizedText {
    pub fn text(&self) -> &str {
        match self {
            LocalizedText::Plain(text) => text,
            LocalizedText::Localized { text, .. } => text,
        }
    }
}

/// One entry of a node set
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VariableDescriptor {
    /// `Variable` entries are read; anything else is skipped. Absent means `Variable`.
    #[serde(default)]
    pub node_class: Option<String>,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    /// Browse name, possibly namespace-prefixed (`2:Temperature`)
    #[serde(default)]
    pub browse_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<LocalizedText>,
    /// Explicit dotted output path, overrides inference
    #[serde(default)]
    pub path: Option<String>,
}

impl VariableDescriptor {
    pub fn is_variable(&self) -> bool {
        match self.node_class.as_deref() {
            None => true,
            Some(class) => class == "Variable" || class == "UAVariable",
        }
    }

    /// Browse name with any `N:` namespace prefix removed
    pub fn bare_browse_name(&self) -> Option<&str> {
        self.browse_name
            .as_deref()
            .map(strip_namespace_prefix)
            .filter(|name| !name.is_empty())
    }

    pub fn display_text(&self) -> Option<&str> {
        self.display_name
            .as_ref()
            .map(LocalizedText::text)
            .filter(|text| !text.is_empty())
    }

    /// Short label for error messages
    pub fn label(&self) -> String {
        if let Some(id) = &self.node_id {
            id.to_string()
        } else if let Some(name) = &self.browse_name {
            name.clone()
        } else if let Some(path) = &self.path {
            path.clone()
        } else {
            "<unnamed descriptor>".to_string()
        }
    }
}

/// `"2:Temperature"` gives `"Temperature"`; names without a numeric prefix are
/// returned unchanged.
pub fn strip_namespace_prefix(name: &str) -> &str {
    match name.split_once(':') {
        Some((prefix, rest)) if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) => {
            rest
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_namespace_prefix() {
        assert_eq!(strip_namespace_prefix("1:Status"), "Status");
        assert_eq!(strip_namespace_prefix("Status"), "Status");
        assert_eq!(strip_namespace_prefix("Tank:Level"), "Tank:Level");
        assert_eq!(strip_namespace_prefix(":Level"), ":Level");
    }

    #[test]
    fn test_deserialize_descriptor() {
        let d: VariableDescriptor = serde_json::from_value(json!({
            "NodeClass": "Variable",
            "NodeId": "ns=2;s=Tank.Temperature",
            "BrowseName": "2:Temperature",
            "DisplayName": {"Text": "Tank Temperature", "Locale": "en"}
        }))
        .unwrap();
        assert!(d.is_variable());
        assert_eq!(d.bare_browse_name(), Some("Temperature"));
        assert_eq!(d.display_text(), Some("Tank Temperature"));
        assert_eq!(d.label(), "ns=2;s=Tank.Temperature");
    }

    #[test]
    fn test_node_class_filter() {
        let object = VariableDescriptor {
            node_class: Some("Object".into()),
            ..Default::default()
        };
        assert!(!object.is_variable());
        assert!(VariableDescriptor::default().is_variable());
    }

    #[test]
    fn test_invalid_node_id_fails_deserialization() {
        let result: Result<VariableDescriptor, _> =
            serde_json::from_value(json!({"NodeId": "ns=1;q=oops"}));
        assert!(result.is_err());
    }
}
