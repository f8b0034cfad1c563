//! Test data builders for creating test objects

use serde_json::{json, Map, Value};
use uatree_rs::nodeset::{LocalizedText, NodeId, VariableDescriptor};

/// Builder for node-set descriptors
pub struct DescriptorBuilder {
    descriptor: VariableDescriptor,
}

impl DescriptorBuilder {
    pub fn variable() -> Self {
        Self {
            descriptor: VariableDescriptor {
                node_class: Some("Variable".to_string()),
                ..Default::default()
            },
        }
    }

    pub fn node_class(mut self, class: &str) -> Self {
        self.descriptor.node_class = Some(class.to_string());
        self
    }

    pub fn node_id(mut self, id: &str) -> Self {
        self.descriptor.node_id = Some(id.parse::<NodeId>().unwrap());
        self
    }

    pub fn browse_name(mut self, name: &str) -> Self {
        self.descriptor.browse_name = Some(name.to_string());
        self
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.descriptor.display_name = Some(LocalizedText::Plain(name.to_string()));
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.descriptor.path = Some(path.to_string());
        self
    }

    pub fn build(self) -> VariableDescriptor {
        self.descriptor
    }
}

/// Builder for schema documents, keys kept in insertion order
#[derive(Default)]
pub struct SchemaBuilder {
    entries: Map<String, Value>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaf `key` reading the remote variable `remote`
    pub fn leaf(mut self, key: &str, remote: &str) -> Self {
        self.entries.insert(key.to_string(), json!(remote));
        self
    }

    pub fn folder(mut self, key: &str, child: SchemaBuilder) -> Self {
        self.entries.insert(key.to_string(), child.build());
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.entries)
    }

    pub fn to_json_string(self) -> String {
        self.build().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let d = DescriptorBuilder::variable()
            .node_id("ns=2;i=1001")
            .browse_name("Status")
            .build();
        assert!(d.is_variable());
        assert_eq!(d.bare_browse_name(), Some("Status"));
    }
}
