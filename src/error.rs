//! Error handling for uatree-rs
//!
//! This module defines the crate-wide error type and a Result alias. The
//! variants follow how far a failure reaches:
//!
//! - [`UaTreeError::Configuration`] - malformed schema or node set, fatal before any I/O
//! - [`UaTreeError::NamespaceNotFound`] - fatal to the session, retried by reconnecting
//! - [`UaTreeError::Resolution`] - a single leaf, normally recovered inside the cycle
//! - [`UaTreeError::Read`] - the batched read failed, the whole cycle is lost

use thiserror::Error;

/// Main error type for uatree-rs operations
#[derive(Error, Debug)]
pub enum UaTreeError {
    /// Malformed schema/node-set input or colliding inferred paths
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested namespace is absent from the server's namespace array
    #[error("Namespace '{namespace}' not found in server namespace array {available:?}")]
    NamespaceNotFound {
        namespace: String,
        available: Vec<String>,
    },

    /// A browse path did not resolve to a node
    #[error("Failed to resolve path {path}: {message}")]
    Resolution { path: String, message: String },

    /// The batched read call itself failed
    #[error("Batched read failed: {0}")]
    Read(String),

    /// Connection or transport level client errors
    #[error("Client error: {0}")]
    Client(String),

    /// Errors raised by an output sink
    #[error("Sink error: {0}")]
    Sink(String),

    /// The cycle was aborted between suspension points
    #[error("Cycle cancelled")]
    Cancelled,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<UaTreeError>,
    },
}

impl UaTreeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        UaTreeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        UaTreeError::Configuration(message.into())
    }

    /// The innermost error, looking through any context wrappers
    pub fn root(&self) -> &UaTreeError {
        match self {
            UaTreeError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Configuration errors are caller bugs and are never retried
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), UaTreeError::Configuration(_))
    }

    /// Errors that invalidate the protocol session and call for a reconnect
    pub fn is_session_error(&self) -> bool {
        matches!(
            self.root(),
            UaTreeError::NamespaceNotFound { .. } | UaTreeError::Client(_) | UaTreeError::Read(_)
        )
    }
}

impl From<serde_json::Error> for UaTreeError {
    fn from(err: serde_json::Error) -> Self {
        UaTreeError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for UaTreeError {
    fn from(err: csv::Error) -> Self {
        UaTreeError::Sink(format!("CSV write failed: {}", err))
    }
}

/// Result type alias for uatree-rs operations
pub type Result<T> = std::result::Result<T, UaTreeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
