//! Backend module for talking to the protocol client
//!
//! Everything that touches a session lives here. Cycles run on a worker
//! thread owned by the binary; the only shared state is the running flag.
//!
//! # Components
//!
//! - [`UaClient`] - Seam over the protocol client (connect, namespace lookup,
//!   browse-path resolution, batched read)
//! - [`SimulatedClient`] - In-memory address space with generated values
//! - [`PathResolver`] - Qualifies remote paths and resolves them concurrently
//! - [`ReadPlan`] / [`read_cycle`] - One resolve, read and populate cycle
//! - [`PollWorker`] - Connection management, interval loop and publishing
//!
//! # Example
//!
//! ```ignore
//! use uatree_rs::backend::{PollWorker, ReadPlan, SimulatedClient, WorkerSettings};
//! use uatree_rs::config::AppConfig;
//! use uatree_rs::sink::MemorySink;
//!
//! let config = AppConfig::default();
//! let document = config.variables_document()?;
//! let plan = ReadPlan::from_document(&document)?;
//! let namespace = config.effective_namespace(&document).to_string();
//! let client = SimulatedClient::mirroring(&plan, &namespace);
//!
//! let mut worker = PollWorker::new(
//!     WorkerSettings::from_config(&config, &namespace),
//!     Box::new(client),
//!     Box::new(MemorySink::new()),
//!     plan,
//!     Arc::new(AtomicBool::new(true)),
//! );
//! let outcome = worker.run_once()?;
//! ```

pub mod client_trait;
pub mod cycle;
pub mod resolver;
pub mod simulated;
pub mod worker;

pub use client_trait::{BrowseEntry, NodeHandle, UaClient};
pub use cycle::{read_cycle, CycleOutcome, PlanSource, ReadPlan};
pub use resolver::{ConnectionContext, PathResolver, Resolution, ResolutionFailure};
pub use simulated::{SimulatedClient, ValuePattern, STANDARD_NAMESPACE};
pub use worker::{PollWorker, WorkerEvent, WorkerSettings, WorkerStats};
