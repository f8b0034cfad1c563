//! UaClient trait for the protocol client seam
//!
//! The engine never talks to the wire itself. Everything it needs from an
//! OPC UA session goes through this trait: namespace discovery, browse-path
//! resolution and one batched read per cycle. Both the simulated client and
//! test doubles implement it.

use crate::error::{Result, UaTreeError};
use crate::types::Variant;
use std::fmt;

/// Opaque address of a resolved node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub String);

impl NodeHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One child reported by [`UaClient::browse_children`]
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseEntry {
    /// Qualified browse name, `"2:Tank"`
    pub browse_name: String,
    pub node_class: String,
    pub handle: NodeHandle,
}

/// Unified interface for protocol clients
///
/// Implementations must be `Send + Sync`: resolutions for independent leaves
/// are issued from several threads at once through a shared reference.
///
/// # Example
///
/// ```ignore
/// fn read_one(client: &dyn UaClient, path: &[String]) -> Result<Variant> {
///     let handle = client.resolve_by_path(path)?;
///     Ok(client.read_batch(&[handle])?.remove(0))
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait UaClient: Send + Sync {
    /// Open a session to `endpoint`
    fn connect(&mut self, endpoint: &str) -> Result<()>;

    /// Close the session; a no-op when not connected
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// The server's namespace array, index 0 first
    fn namespace_array(&self) -> Result<Vec<String>>;

    /// Index of `name` in the namespace array
    fn namespace_index(&self, name: &str) -> Result<u16> {
        let namespaces = self.namespace_array()?;
        match namespaces.iter().position(|ns| ns == name) {
            Some(index) => u16::try_from(index)
                .map_err(|_| UaTreeError::Client(format!("namespace index {} out of range", index))),
            None => Err(UaTreeError::NamespaceNotFound {
                namespace: name.to_string(),
                available: namespaces,
            }),
        }
    }

    /// Resolve a fully qualified browse path.
    ///
    /// The first element is the root container (`"0:Objects"`), every
    /// following element a `"<nsIndex>:<name>"` segment.
    fn resolve_by_path(&self, qualified_path: &[String]) -> Result<NodeHandle>;

    /// Read all `handles` in one round trip.
    ///
    /// The result has exactly one value per handle, in the same order.
    fn read_batch(&self, handles: &[NodeHandle]) -> Result<Vec<Variant>>;

    /// Direct children of the container at `qualified_path`
    fn browse_children(&self, qualified_path: &[String]) -> Result<Vec<BrowseEntry>>;
}
