//! Simulated OPC UA Client
//!
//! This module provides an in-memory address space implementing
//! [`UaClient`], so the engine can run without a server. Every variable
//! produces values from a configurable pattern.
//!
//! # Value Patterns
//!
//! Patterns produce the variant type a real device would report:
//!
//! - [`ValuePattern::Constant`] - Fixed value of any variant type
//! - [`ValuePattern::Sine`] - Analog process value as a `Float`
//! - [`ValuePattern::Counter`] - Wrapping production count as an `Int`
//! - [`ValuePattern::Toggle`] - Run/stop flag as a `Bool`
//! - [`ValuePattern::States`] - Steps through a list of values, one per read
//!
//! # Example
//!
//! ```ignore
//! use uatree_rs::backend::{SimulatedClient, ValuePattern};
//!
//! let mut client = SimulatedClient::new("example:ironflock:com");
//! client.add_variable(&["Tank", "Temperature"], ValuePattern::Constant(23.3.into()));
//! client.connect("opc.tcp://simulated")?;
//! ```
//!
//! Round trips are counted ([`SimulatedClient::resolve_calls`],
//! [`SimulatedClient::read_calls`]) and failures can be injected, which is
//! what the integration tests lean on.

use super::client_trait::{BrowseEntry, NodeHandle, UaClient};
use super::cycle::ReadPlan;
use crate::config::DEFAULT_ROOT_QUALIFIER;
use crate::error::{Result, UaTreeError};
use crate::types::Variant;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Namespace 0 of every server
pub const STANDARD_NAMESPACE: &str = "http://opcfoundation.org/UA/";

/// Pattern for generating simulated values
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePattern {
    Constant(Variant),
    /// `offset + amplitude * sin(2π t / period)`
    Sine {
        period_secs: f64,
        amplitude: f64,
        offset: f64,
    },
    /// `0, step, 2 * step, ...` modulo `wrap`
    Counter { step: i64, wrap: i64 },
    /// `true` for the first half of every period
    Toggle { period_secs: f64 },
    /// Next value on every read, starting over at the end
    States(Vec<Variant>),
}

impl ValuePattern {
    /// Pick a plausible pattern from a leaf's browse name
    pub fn for_leaf(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if ["status", "state", "mode"].iter().any(|k| lower.contains(k)) {
            ValuePattern::States(vec![
                Variant::from("OK"),
                Variant::from("Warning"),
                Variant::from("Fault"),
            ])
        } else if ["running", "enabled", "active", "alarm"].iter().any(|k| lower.contains(k)) {
            ValuePattern::Toggle { period_secs: 30.0 }
        } else if ["count", "total", "cycles"].iter().any(|k| lower.contains(k)) {
            ValuePattern::Counter { step: 1, wrap: 1_000_000 }
        } else {
            ValuePattern::Sine {
                period_secs: 60.0,
                amplitude: 10.0,
                offset: 20.0,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SimulatedVariable {
    pattern: ValuePattern,
    reads: u64,
}

impl SimulatedVariable {
    fn new(pattern: ValuePattern) -> Self {
        Self { pattern, reads: 0 }
    }

    fn next_value(&mut self, elapsed_secs: f64) -> Variant {
        let reads = self.reads;
        self.reads += 1;
        match &self.pattern {
            ValuePattern::Constant(v) => v.clone(),
            ValuePattern::Sine {
                period_secs,
                amplitude,
                offset,
            } => {
                let phase = std::f64::consts::TAU * elapsed_secs / period_secs.max(f64::EPSILON);
                Variant::Float(offset + amplitude * phase.sin())
            }
            ValuePattern::Counter { step, wrap } => {
                let count = (reads as i64).wrapping_mul(*step);
                Variant::Int(if *wrap > 0 { count.rem_euclid(*wrap) } else { count })
            }
            ValuePattern::Toggle { period_secs } => {
                let period = period_secs.max(f64::EPSILON);
                Variant::Bool(elapsed_secs % period < period / 2.0)
            }
            ValuePattern::States(values) if values.is_empty() => Variant::Null,
            ValuePattern::States(values) => values[(reads % values.len() as u64) as usize].clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct SimulatedNode {
    qualified_path: Vec<String>,
    handle: NodeHandle,
    is_variable: bool,
}

/// In-memory OPC UA server stand-in
#[derive(Debug)]
pub struct SimulatedClient {
    namespaces: Vec<String>,
    /// Namespace used by `add_variable`
    default_namespace: u16,
    nodes: Vec<SimulatedNode>,
    index: HashMap<Vec<String>, usize>,
    variables: Mutex<HashMap<NodeHandle, SimulatedVariable>>,
    connected: bool,
    endpoint: Option<String>,
    start_time: Instant,
    resolve_latency: Duration,
    resolve_calls: AtomicUsize,
    read_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    failing_reads: AtomicUsize,
    failing_connects: AtomicUsize,
}

impl SimulatedClient {
    /// Create a server whose namespace array is `[standard, namespace]`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespaces: vec![STANDARD_NAMESPACE.to_string(), namespace.into()],
            default_namespace: 1,
            nodes: Vec::new(),
            index: HashMap::new(),
            variables: Mutex::new(HashMap::new()),
            connected: false,
            endpoint: None,
            start_time: Instant::now(),
            resolve_latency: Duration::ZERO,
            resolve_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            failing_reads: AtomicUsize::new(0),
            failing_connects: AtomicUsize::new(0),
        }
    }

    /// Serve every target of `plan` under `namespace`, choosing each
    /// pattern from the leaf name
    pub fn mirroring(plan: &ReadPlan, namespace: impl Into<String>) -> Self {
        let mut client = Self::new(namespace);
        for target in plan.targets() {
            let path: Vec<&str> = target.remote_path.iter().map(String::as_str).collect();
            let name = path.last().copied().unwrap_or_default();
            client.add_variable(&path, ValuePattern::for_leaf(name));
        }
        client
    }

    /// Put extra namespaces in front of the configured one, shifting its index
    pub fn with_leading_namespaces(mut self, extra: &[&str]) -> Self {
        let configured = self.namespaces.split_off(1);
        self.namespaces.extend(extra.iter().map(|s| s.to_string()));
        self.default_namespace = self.namespaces.len() as u16;
        self.namespaces.extend(configured);
        self.rebuild_with_namespace();
        self
    }

    /// Sleep this long inside every resolve call
    pub fn with_resolve_latency(mut self, latency: Duration) -> Self {
        self.resolve_latency = latency;
        self
    }

    pub fn namespace_index_of_variables(&self) -> u16 {
        self.default_namespace
    }

    /// Add a variable at `path` below the Objects folder, creating folders on the way
    pub fn add_variable(&mut self, path: &[&str], pattern: ValuePattern) -> NodeHandle {
        let qualified = self.qualify(path);
        for depth in 2..qualified.len() {
            self.insert_node(qualified[..depth].to_vec(), false);
        }
        let handle = self.insert_node(qualified, true);
        self.lock_variables()
            .insert(handle.clone(), SimulatedVariable::new(pattern));
        handle
    }

    /// The next `count` batched reads fail with a read error
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// The next `count` connection attempts fail
    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn variable_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_variable).count()
    }

    fn qualify(&self, path: &[&str]) -> Vec<String> {
        std::iter::once(DEFAULT_ROOT_QUALIFIER.to_string())
            .chain(path.iter().map(|s| format!("{}:{}", self.default_namespace, s)))
            .collect()
    }

    fn insert_node(&mut self, qualified_path: Vec<String>, is_variable: bool) -> NodeHandle {
        if let Some(&i) = self.index.get(&qualified_path) {
            if is_variable {
                self.nodes[i].is_variable = true;
            }
            return self.nodes[i].handle.clone();
        }
        let handle = handle_for(&qualified_path);
        self.index.insert(qualified_path.clone(), self.nodes.len());
        self.nodes.push(SimulatedNode {
            qualified_path,
            handle: handle.clone(),
            is_variable,
        });
        handle
    }

    /// Re-tag stored paths after the namespace index changed
    fn rebuild_with_namespace(&mut self) {
        let ns = self.default_namespace;
        let mut variables = std::mem::take(&mut *self.lock_variables());
        let old_nodes = std::mem::take(&mut self.nodes);
        self.index.clear();
        for node in old_nodes {
            let path: Vec<String> = node
                .qualified_path
                .iter()
                .enumerate()
                .map(|(i, seg)| match (i, seg.split_once(':')) {
                    (0, _) => seg.clone(),
                    (_, Some((_, name))) => format!("{}:{}", ns, name),
                    _ => seg.clone(),
                })
                .collect();
            let handle = self.insert_node(path, node.is_variable);
            if let Some(var) = variables.remove(&node.handle) {
                self.lock_variables().insert(handle, var);
            }
        }
    }

    fn lock_variables(&self) -> std::sync::MutexGuard<'_, HashMap<NodeHandle, SimulatedVariable>> {
        self.variables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(UaTreeError::Client("not connected".to_string()))
        }
    }
}

fn handle_for(qualified_path: &[String]) -> NodeHandle {
    let ns = qualified_path
        .last()
        .and_then(|seg| seg.split_once(':'))
        .map(|(ns, _)| ns)
        .unwrap_or("0");
    let names: Vec<&str> = qualified_path
        .iter()
        .skip(1)
        .map(|seg| seg.split_once(':').map_or(seg.as_str(), |(_, name)| name))
        .collect();
    NodeHandle::new(format!("ns={};s={}", ns, names.join(".")))
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl UaClient for SimulatedClient {
    fn connect(&mut self, endpoint: &str) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_connects) {
            return Err(UaTreeError::Client(format!("connection to {} refused", endpoint)));
        }
        self.connected = true;
        self.endpoint = Some(endpoint.to_string());
        self.start_time = Instant::now();
        tracing::info!("Simulated client connected to {}", endpoint);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            tracing::info!("Simulated client disconnected");
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn namespace_array(&self) -> Result<Vec<String>> {
        self.ensure_connected()?;
        Ok(self.namespaces.clone())
    }

    fn resolve_by_path(&self, qualified_path: &[String]) -> Result<NodeHandle> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        if !self.resolve_latency.is_zero() {
            std::thread::sleep(self.resolve_latency);
        }
        self.index
            .get(qualified_path)
            .map(|&i| self.nodes[i].handle.clone())
            .ok_or_else(|| UaTreeError::Resolution {
                path: qualified_path.join("/"),
                message: "BadNoMatch".to_string(),
            })
    }

    fn read_batch(&self, handles: &[NodeHandle]) -> Result<Vec<Variant>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_connected()?;
        if take_one(&self.failing_reads) {
            return Err(UaTreeError::Read("BadCommunicationError".to_string()));
        }
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let mut variables = self.lock_variables();
        Ok(handles
            .iter()
            .map(|handle| {
                variables
                    .get_mut(handle)
                    .map(|var| var.next_value(elapsed))
                    .unwrap_or(Variant::Null)
            })
            .collect())
    }

    fn browse_children(&self, qualified_path: &[String]) -> Result<Vec<BrowseEntry>> {
        self.ensure_connected()?;
        Ok(self
            .nodes
            .iter()
            .filter(|node| {
                node.qualified_path.len() == qualified_path.len() + 1
                    && node.qualified_path.starts_with(qualified_path)
            })
            .map(|node| BrowseEntry {
                browse_name: node.qualified_path.last().cloned().unwrap_or_default(),
                node_class: if node.is_variable { "Variable" } else { "Object" }.to_string(),
                handle: node.handle.clone(),
            })
            .collect())
    }
}
