//! # uatree-rs: Schema-driven OPC UA tree reader
//!
//! Reads a set of variables from an OPC UA server every interval, rebuilds
//! them into a nested tree shaped like the user's schema, and flattens the
//! tree into `(tsp, variable, value)` rows for tabular sinks.
//!
//! ## Architecture
//!
//! - **Tree**: schema parsing, pre-order walk, population and flattening
//! - **Node set**: infers tree locations from flat variable descriptors
//! - **Backend**: client seam, concurrent path resolution, batched reads and
//!   the poll worker that runs on its own thread
//! - **Sink**: JSON lines, rotating CSV files and an in-memory collector
//!
//! ## Configuration
//!
//! Defaults, then an optional TOML file, then environment variables
//! (`OPCUA_URL`, `OPCUA_NAMESPACE`, `OPCUA_VARIABLES`, `PUBLISH_INTERVAL`, ...).
//! Default output files go to the platform data directory under
//! `dev.hxyulin.uatree-rs`:
//!
//! - **Linux**: `~/.local/share/dev.hxyulin.uatree-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.uatree-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.uatree-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use uatree_rs::{Flattener, Schema, populate, walk};
//!
//! let schema = Schema::parse(r#"{"Tank": "Temperature"}"#)?;
//! let targets = walk(&schema);
//! let tree = populate(&schema.skeleton(), "2025-11-20T10:00:00+01:00", [(&targets[0], 23.3.into())])?;
//! let rows = Flattener::new().flatten(&tree);
//! assert_eq!(rows[0].variable, "Tank.Temperature");
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod nodeset;
pub mod sink;
pub mod tree;
pub mod types;

// Re-export commonly used types
pub use backend::{PollWorker, ReadPlan, SimulatedClient, UaClient};
pub use config::{AppConfig, VariablesDocument};
pub use error::{Result, ResultExt, UaTreeError};
pub use nodeset::{interpret, VariableDescriptor};
pub use sink::{build_sink, Sink};
pub use tree::{populate, walk, Branch, Flattener, PopulatedTree, Schema, SchemaNode, ValueTree};
pub use types::{FlatRow, LeafLayout, ResolutionTarget, Variant};
