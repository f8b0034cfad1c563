//! One resolve, read and populate cycle.
//!
//! Ordering inside a cycle is strict: every resolution finishes before the
//! single batched read is issued, and the read finishes before the tree is
//! populated. The running flag is checked at each of those boundaries; a
//! cancelled cycle returns [`UaTreeError::Cancelled`] and produces no tree.

use super::client_trait::{NodeHandle, UaClient};
use super::resolver::{ConnectionContext, PathResolver, ResolutionFailure};
use crate::config::VariablesDocument;
use crate::error::{Result, UaTreeError};
use crate::nodeset::{interpret, VariableDescriptor};
use crate::tree::{populate, walk, Branch, PopulatedTree, Schema};
use crate::types::{local_timestamp, CycleStats, LeafLayout, ResolutionTarget, Variant};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Where a plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Schema,
    NodeSet,
}

/// Targets to resolve each cycle plus the tree shape they populate.
///
/// Built once from configuration; cycles only read it.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    source: PlanSource,
    targets: Vec<ResolutionTarget>,
    shape: Branch,
}

impl ReadPlan {
    pub fn from_schema(schema: &Schema) -> Self {
        Self {
            source: PlanSource::Schema,
            targets: walk(schema),
            shape: schema.skeleton(),
        }
    }

    pub fn from_node_set(descriptors: &[VariableDescriptor]) -> Result<Self> {
        let interpretation = interpret(descriptors)?;
        if interpretation.skipped > 0 {
            tracing::debug!(
                "Node set: {} variables, {} non-variable entries skipped",
                interpretation.targets.len(),
                interpretation.skipped
            );
        }
        Ok(Self {
            source: PlanSource::NodeSet,
            targets: interpretation.targets,
            shape: interpretation.shape,
        })
    }

    pub fn from_document(document: &VariablesDocument) -> Result<Self> {
        match document {
            VariablesDocument::Schema(schema) => Ok(Self::from_schema(schema)),
            VariablesDocument::NodeSet { descriptors, .. } => Self::from_node_set(descriptors),
        }
    }

    pub fn source(&self) -> PlanSource {
        self.source
    }

    pub fn targets(&self) -> &[ResolutionTarget] {
        &self.targets
    }

    pub fn shape(&self) -> &Branch {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Dotted output paths of every variable, in plan order
    pub fn variable_names(&self) -> Vec<String> {
        self.targets
            .iter()
            .map(|t| match t.layout {
                LeafLayout::Direct => t.location_string(),
                LeafLayout::Named => {
                    format!("{}.{}", t.location_string(), t.display_name)
                }
            })
            .collect()
    }

    /// A tree of this plan's shape with no values, for cycles that cannot read
    pub fn empty_tree(&self, tsp: impl Into<String>) -> PopulatedTree {
        PopulatedTree::new(tsp, self.shape.clone())
    }
}

/// Everything a finished cycle produced
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub tree: PopulatedTree,
    pub failures: Vec<ResolutionFailure>,
    pub stats: CycleStats,
}

/// Run one cycle on a connected client.
pub fn read_cycle(
    client: &dyn UaClient,
    context: &ConnectionContext,
    plan: &ReadPlan,
    max_concurrent: usize,
    running: &AtomicBool,
) -> Result<CycleOutcome> {
    let mut stats = CycleStats::default();
    check_running(running)?;
    let tsp = local_timestamp();

    let resolve_start = Instant::now();
    let resolver = PathResolver::new(client, context).with_concurrency(max_concurrent);
    let resolutions = resolver.resolve_all(plan.targets(), running)?;
    stats.resolve_time_us = resolve_start.elapsed().as_micros() as u64;

    let mut resolved: Vec<(&ResolutionTarget, NodeHandle)> = Vec::with_capacity(resolutions.len());
    let mut failures = Vec::new();
    for (target, resolution) in plan.targets().iter().zip(resolutions) {
        match resolution {
            Ok(handle) => resolved.push((target, handle)),
            Err(failure) => {
                tracing::warn!(
                    path = %failure.attempted_path_string(),
                    location = %target.location_string(),
                    "Could not resolve variable: {}",
                    failure.reason
                );
                failures.push(failure);
            }
        }
    }
    stats.resolved = resolved.len();
    stats.unresolved = failures.len();
    check_running(running)?;

    let values = if resolved.is_empty() {
        Vec::new()
    } else {
        let handles: Vec<NodeHandle> = resolved.iter().map(|(_, h)| h.clone()).collect();
        let read_start = Instant::now();
        let values = client.read_batch(&handles)?;
        stats.read_time_us = read_start.elapsed().as_micros() as u64;
        stats.read_calls = 1;
        if values.len() != handles.len() {
            return Err(UaTreeError::Read(format!(
                "server returned {} values for {} handles",
                values.len(),
                handles.len()
            )));
        }
        values
    };
    check_running(running)?;

    let pairs: Vec<(&ResolutionTarget, Variant)> = resolved
        .into_iter()
        .map(|(target, _)| target)
        .zip(values)
        .collect();
    let tree = populate(plan.shape(), tsp, pairs)?;

    Ok(CycleOutcome {
        tree,
        failures,
        stats,
    })
}

fn check_running(running: &AtomicBool) -> Result<()> {
    if running.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(UaTreeError::Cancelled)
    }
}
