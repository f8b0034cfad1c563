//! Browse-path resolution against a connected client.
//!
//! A remote path `["Tank", "Temperature"]` is qualified with the root
//! container and the session's namespace index before it reaches the client:
//!
//! ```text
//! ["0:Objects", "2:Tank", "2:Temperature"]
//! ```
//!
//! Leaves are independent, so [`PathResolver::resolve_all`] fans the calls
//! out over a bounded set of scoped threads. A leaf that fails to resolve is
//! reported as a [`ResolutionFailure`] and never aborts the others.

use super::client_trait::{NodeHandle, UaClient};
use crate::error::{Result, UaTreeError};
use crate::types::ResolutionTarget;
use crossbeam_channel::unbounded;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Session state shared by every cycle on one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    namespace: String,
    namespace_index: u16,
    root_qualifier: String,
}

impl ConnectionContext {
    pub fn new(namespace: impl Into<String>, namespace_index: u16, root_qualifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            namespace_index,
            root_qualifier: root_qualifier.into(),
        }
    }

    /// Look up `namespace` on a connected client and cache its index.
    ///
    /// Fails with [`UaTreeError::NamespaceNotFound`] when the server does not
    /// know the namespace.
    pub fn establish(client: &dyn UaClient, namespace: &str, root_qualifier: &str) -> Result<Self> {
        let index = client.namespace_index(namespace)?;
        tracing::info!("Namespace '{}' has index {}", namespace, index);
        Ok(Self::new(namespace, index, root_qualifier))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn namespace_index(&self) -> u16 {
        self.namespace_index
    }

    pub fn root_qualifier(&self) -> &str {
        &self.root_qualifier
    }

    /// `["0:Objects", "<ns>:seg", ...]`
    pub fn qualify(&self, remote_path: &[String]) -> Vec<String> {
        std::iter::once(self.root_qualifier.clone())
            .chain(
                remote_path
                    .iter()
                    .map(|segment| format!("{}:{}", self.namespace_index, segment)),
            )
            .collect()
    }
}

/// A single leaf whose path did not resolve
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionFailure {
    /// Position of the target in the plan
    pub index: usize,
    /// The fully qualified path that was attempted
    pub attempted_path: Vec<String>,
    pub reason: String,
}

impl ResolutionFailure {
    pub fn attempted_path_string(&self) -> String {
        self.attempted_path.join("/")
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.attempted_path_string(), self.reason)
    }
}

impl From<ResolutionFailure> for UaTreeError {
    fn from(failure: ResolutionFailure) -> Self {
        UaTreeError::Resolution {
            path: failure.attempted_path_string(),
            message: failure.reason,
        }
    }
}

pub type Resolution = std::result::Result<NodeHandle, ResolutionFailure>;

/// Resolves remote paths through a client
pub struct PathResolver<'a> {
    client: &'a dyn UaClient,
    context: &'a ConnectionContext,
    max_concurrent: usize,
}

impl<'a> PathResolver<'a> {
    pub fn new(client: &'a dyn UaClient, context: &'a ConnectionContext) -> Self {
        Self {
            client,
            context,
            max_concurrent: 1,
        }
    }

    /// Allow up to `limit` resolutions in flight at once
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrent = limit.max(1);
        self
    }

    pub fn qualified_path(&self, remote_path: &[String]) -> Vec<String> {
        self.context.qualify(remote_path)
    }

    pub fn resolve(&self, remote_path: &[String]) -> Resolution {
        self.resolve_indexed(0, remote_path)
    }

    fn resolve_indexed(&self, index: usize, remote_path: &[String]) -> Resolution {
        let qualified = self.qualified_path(remote_path);
        match self.client.resolve_by_path(&qualified) {
            Ok(handle) => Ok(handle),
            Err(e) => Err(ResolutionFailure {
                index,
                attempted_path: qualified,
                reason: e.to_string(),
            }),
        }
    }

    /// Resolve every target, preserving target order in the result.
    ///
    /// `running` is checked before each call; once it drops the remaining
    /// targets are skipped and [`UaTreeError::Cancelled`] is returned.
    pub fn resolve_all(&self, targets: &[ResolutionTarget], running: &AtomicBool) -> Result<Vec<Resolution>> {
        let workers = self.max_concurrent.min(targets.len());
        if workers <= 1 {
            let mut results = Vec::with_capacity(targets.len());
            for (index, target) in targets.iter().enumerate() {
                if !running.load(Ordering::SeqCst) {
                    return Err(UaTreeError::Cancelled);
                }
                results.push(self.resolve_indexed(index, &target.remote_path));
            }
            return Ok(results);
        }

        let (job_tx, job_rx) = unbounded::<usize>();
        let (result_tx, result_rx) = unbounded::<(usize, Resolution)>();
        for index in 0..targets.len() {
            // Receiver is alive in this scope
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(index) = job_rx.recv() {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        let resolution = self.resolve_indexed(index, &targets[index].remote_path);
                        if result_tx.send((index, resolution)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<Resolution>> = vec![None; targets.len()];
        for (index, resolution) in result_rx.iter() {
            slots[index] = Some(resolution);
        }
        if !running.load(Ordering::SeqCst) || slots.iter().any(Option::is_none) {
            return Err(UaTreeError::Cancelled);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}
