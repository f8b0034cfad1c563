//! Poll worker
//!
//! Runs serialized resolve/read/publish cycles on one client session at a
//! fixed interval. The worker is meant to live on its own thread and is
//! stopped through a shared running flag.
//!
//! # Responsibilities
//!
//! - **Connection**: connects with exponential backoff and caches the
//!   namespace index in a [`ConnectionContext`]
//! - **Cycles**: one [`read_cycle`] per interval tick; the next cycle never
//!   starts before the previous publish has finished
//! - **Publishing**: trees and/or flattened rows go to the [`Sink`], keyed by
//!   the namespace name
//! - **Recovery**: session errors drop the session and reconnect on the next
//!   tick; configuration errors stop the worker
//!
//! # Cancellation
//!
//! The running flag is checked between suspension points. A cancelled cycle
//! publishes nothing; the sink is closed and the session dropped on the way
//! out.

use super::client_trait::UaClient;
use super::cycle::{read_cycle, CycleOutcome, ReadPlan};
use super::resolver::ConnectionContext;
use crate::config::{AppConfig, OutputMode, RetryConfig};
use crate::error::{Result, UaTreeError};
use crate::sink::Sink;
use crate::tree::Flattener;
use crate::types::CycleStats;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single sleep between running-flag checks
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Settings the worker takes from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub endpoint: String,
    /// Namespace name after any node-set override
    pub namespace: String,
    pub root_qualifier: String,
    pub max_concurrent_resolves: usize,
    pub publish_interval: Duration,
    pub table: String,
    pub output: OutputMode,
    pub include_unset_rows: bool,
    pub retry: RetryConfig,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig, namespace: &str) -> Self {
        Self {
            endpoint: config.connection.endpoint.clone(),
            namespace: namespace.to_string(),
            root_qualifier: config.connection.root_qualifier.clone(),
            max_concurrent_resolves: config.connection.max_concurrent_resolves,
            publish_interval: config.publish_interval(),
            table: config.collection.table.clone(),
            output: config.collection.output,
            include_unset_rows: config.collection.include_unset_rows,
            retry: config.retry.clone(),
        }
    }
}

/// Notifications sent to an optional observer
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Connected { namespace_index: u16 },
    CycleCompleted(CycleStats),
    CycleFailed(String),
    Disconnected,
    Stopped,
}

/// Totals across the worker's lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub connect_attempts: u64,
    pub reconnects: u64,
    pub rows_published: u64,
    pub trees_published: u64,
    pub unresolved_total: u64,
    pub last_cycle: Option<CycleStats>,
}

pub struct PollWorker {
    settings: WorkerSettings,
    client: Box<dyn UaClient>,
    sink: Box<dyn Sink>,
    plan: ReadPlan,
    /// Present while a session is open
    context: Option<ConnectionContext>,
    running: Arc<AtomicBool>,
    events: Option<Sender<WorkerEvent>>,
    flattener: Flattener,
    keys: Vec<String>,
    stats: WorkerStats,
    sessions_opened: u64,
    variables_logged: bool,
}

impl PollWorker {
    pub fn new(
        settings: WorkerSettings,
        client: Box<dyn UaClient>,
        sink: Box<dyn Sink>,
        plan: ReadPlan,
        running: Arc<AtomicBool>,
    ) -> Self {
        let flattener = Flattener::new().with_unset_rows(settings.include_unset_rows);
        let keys = vec![settings.namespace.clone()];
        Self {
            settings,
            client,
            sink,
            plan,
            context: None,
            running,
            events: None,
            flattener,
            keys,
            stats: WorkerStats::default(),
            sessions_opened: 0,
            variables_logged: false,
        }
    }

    /// Report progress on `sender`; full channels drop events
    pub fn with_events(mut self, sender: Sender<WorkerEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn plan(&self) -> &ReadPlan {
        &self.plan
    }

    pub fn context(&self) -> Option<&ConnectionContext> {
        self.context.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.context.is_some() && self.client.is_connected()
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run cycles until the running flag drops or a fatal error occurs
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(
            "Poll worker started: {} variables every {:?}",
            self.plan.len(),
            self.settings.publish_interval
        );

        let result = self.run_loop();
        self.shutdown();
        match result {
            Err(UaTreeError::Cancelled) => Ok(()),
            other => other,
        }
    }

    fn run_loop(&mut self) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            self.ensure_connected()?;

            let started = Instant::now();
            match self.cycle() {
                Ok(_) => {}
                Err(UaTreeError::Cancelled) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    tracing::error!("Stopping poll worker: {}", e);
                    return Err(e);
                }
                Err(e) => self.record_failure(&e),
            }

            let next = started + self.settings.publish_interval;
            self.sleep_while_running(next.saturating_duration_since(Instant::now()));
        }
        Ok(())
    }

    /// Connect if needed and run a single cycle
    pub fn run_once(&mut self) -> Result<CycleOutcome> {
        self.ensure_connected()?;
        self.cycle().inspect_err(|e| {
            if !matches!(e, UaTreeError::Cancelled) {
                self.record_failure(e);
            }
        })
    }

    /// Open a session, retrying with backoff until it succeeds, the retry
    /// budget runs out, or the running flag drops
    pub fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let mut attempt = 0u32;
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Err(UaTreeError::Cancelled);
            }
            self.stats.connect_attempts += 1;
            match self.open_session() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if self.settings.retry.exhausted(attempt) {
                        tracing::error!("Giving up after {} connection attempts: {}", attempt, e);
                        return Err(e);
                    }
                    let delay = self.settings.retry.delay_for_attempt(attempt - 1);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Connection to {} failed: {}",
                        self.settings.endpoint,
                        e
                    );
                    self.sleep_while_running(delay);
                }
            }
        }
    }

    fn open_session(&mut self) -> Result<()> {
        self.client.connect(&self.settings.endpoint)?;
        let context = match ConnectionContext::establish(
            self.client.as_ref(),
            &self.settings.namespace,
            &self.settings.root_qualifier,
        ) {
            Ok(context) => context,
            Err(e) => {
                self.client.disconnect();
                return Err(e);
            }
        };

        if self.sessions_opened == 0 {
            self.log_root_children(&context);
        } else {
            self.stats.reconnects += 1;
        }
        self.sessions_opened += 1;

        tracing::info!(
            "Connected to {} (namespace index {})",
            self.settings.endpoint,
            context.namespace_index()
        );
        self.send_event(WorkerEvent::Connected {
            namespace_index: context.namespace_index(),
        });
        self.context = Some(context);
        Ok(())
    }

    fn log_root_children(&self, context: &ConnectionContext) {
        let root = vec![context.root_qualifier().to_string()];
        match self.client.browse_children(&root) {
            Ok(children) => {
                tracing::info!("{} has {} children", context.root_qualifier(), children.len());
                for child in children {
                    tracing::info!("  {} ({})", child.browse_name, child.node_class);
                }
            }
            Err(e) => tracing::warn!("Could not browse {}: {}", context.root_qualifier(), e),
        }
    }

    fn drop_session(&mut self) {
        if self.context.take().is_some() {
            self.client.disconnect();
            self.send_event(WorkerEvent::Disconnected);
        }
    }

    fn cycle(&mut self) -> Result<CycleOutcome> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| UaTreeError::Client("no open session".to_string()))?;

        if !self.variables_logged {
            let names = self.plan.variable_names();
            tracing::info!("Reading {} variables:", names.len());
            for name in &names {
                tracing::info!("  {}", name);
            }
            self.variables_logged = true;
        }

        let outcome = read_cycle(
            self.client.as_ref(),
            context,
            &self.plan,
            self.settings.max_concurrent_resolves,
            &self.running,
        )?;

        if !self.running.load(Ordering::SeqCst) {
            return Err(UaTreeError::Cancelled);
        }
        self.publish(&outcome)?;

        self.stats.cycles += 1;
        self.stats.unresolved_total += outcome.stats.unresolved as u64;
        self.stats.last_cycle = Some(outcome.stats.clone());
        tracing::debug!(
            resolved = outcome.stats.resolved,
            unresolved = outcome.stats.unresolved,
            resolve_us = outcome.stats.resolve_time_us,
            read_us = outcome.stats.read_time_us,
            "Cycle {} complete",
            self.stats.cycles
        );
        self.send_event(WorkerEvent::CycleCompleted(outcome.stats.clone()));
        Ok(outcome)
    }

    fn publish(&mut self, outcome: &CycleOutcome) -> Result<()> {
        let table = &self.settings.table;
        let output = &self.settings.output;
        let accepts_trees = self.sink.accepts_trees();
        if output.publishes_tree() && accepts_trees {
            self.sink.publish_tree(table, &self.keys, &outcome.tree)?;
            self.stats.trees_published += 1;
        }
        if output.publishes_rows() || !accepts_trees {
            for row in self.flattener.flatten(&outcome.tree) {
                self.sink.publish_row(table, &self.keys, &row)?;
                self.stats.rows_published += 1;
            }
        }
        self.sink.flush()
    }

    fn record_failure(&mut self, error: &UaTreeError) {
        self.stats.failed_cycles += 1;
        tracing::warn!("Cycle failed: {}", error);
        if error.is_session_error() {
            self.drop_session();
        }
        self.send_event(WorkerEvent::CycleFailed(error.to_string()));
    }

    /// Close the sink and the session
    pub fn shutdown(&mut self) {
        if let Err(e) = self.sink.close() {
            tracing::error!("Failed to close sink: {}", e);
        }
        self.drop_session();
        self.client.disconnect();
        self.send_event(WorkerEvent::Stopped);
        tracing::info!(
            "Poll worker stopped after {} cycles ({} failed)",
            self.stats.cycles,
            self.stats.failed_cycles
        );
    }

    fn sleep_while_running(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.running.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }

    fn send_event(&self, event: WorkerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::client_trait::{MockUaClient, NodeHandle};
    use crate::backend::simulated::{SimulatedClient, ValuePattern};
    use crate::sink::{MemorySink, MockSink};
    use crate::tree::Schema;
    use crate::types::Variant;
    use crossbeam_channel::unbounded;
    use serde_json::json;

    const NS: &str = "example:ironflock:com";

    fn settings(output: OutputMode) -> WorkerSettings {
        WorkerSettings {
            endpoint: "opc.tcp://simulated".to_string(),
            namespace: NS.to_string(),
            root_qualifier: "0:Objects".to_string(),
            max_concurrent_resolves: 2,
            publish_interval: Duration::from_millis(20),
            table: "opcuadata".to_string(),
            output,
            include_unset_rows: false,
            retry: RetryConfig {
                initial_delay_ms: 1,
                max_delay_ms: 5,
                multiplier: 2.0,
                max_attempts: Some(3),
            },
        }
    }

    fn tank_plan() -> ReadPlan {
        ReadPlan::from_schema(&Schema::from_json(&json!({"Tank": "Temperature"})).unwrap())
    }

    fn tank_client() -> SimulatedClient {
        let mut client = SimulatedClient::new(NS);
        client.add_variable(
            &["Tank", "Temperature"],
            ValuePattern::Constant(Variant::Float(23.3)),
        );
        client
    }

    fn worker(settings: WorkerSettings, client: SimulatedClient, sink: MemorySink) -> PollWorker {
        PollWorker::new(
            settings,
            Box::new(client),
            Box::new(sink),
            tank_plan(),
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[test]
    fn test_settings_from_config() {
        let config = AppConfig::default();
        let settings = WorkerSettings::from_config(&config, "urn:override");
        assert_eq!(settings.namespace, "urn:override");
        assert_eq!(settings.publish_interval, Duration::from_secs(3));
        assert_eq!(settings.table, "opcuadata");
    }

    #[test]
    fn test_run_once_publishes_rows_keyed_by_namespace() {
        let sink = MemorySink::new();
        let mut worker = worker(settings(OutputMode::Rows), tank_client(), sink.clone());

        let outcome = worker.run_once().unwrap();
        assert_eq!(outcome.stats.resolved, 1);
        assert!(worker.is_connected());

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table, "opcuadata");
        assert_eq!(rows[0].keys, vec![NS]);
        assert_eq!(rows[0].row.variable, "Tank.Temperature");
        assert_eq!(rows[0].row.value, Variant::Float(23.3));
        assert_eq!(sink.tree_count(), 0);
        assert_eq!(sink.flush_count(), 1);
        assert_eq!(worker.stats().cycles, 1);
        assert_eq!(worker.stats().rows_published, 1);
    }

    #[test]
    fn test_both_outputs() {
        let sink = MemorySink::new();
        let mut worker = worker(settings(OutputMode::Both), tank_client(), sink.clone());
        worker.run_once().unwrap();
        assert_eq!(sink.row_count(), 1);
        let tree = sink.last_tree().unwrap();
        assert_eq!(tree.data.to_json(), json!({"Tank": {"Temperature": 23.3}}));
    }

    #[test]
    fn test_unset_rows_when_enabled() {
        let mut s = settings(OutputMode::Rows);
        s.include_unset_rows = true;
        let sink = MemorySink::new();
        let plan = ReadPlan::from_schema(
            &Schema::from_json(&json!({"Tank": "Temperature", "Pump": "Speed"})).unwrap(),
        );
        let mut worker = PollWorker::new(
            s,
            Box::new(tank_client()),
            Box::new(sink.clone()),
            plan,
            Arc::new(AtomicBool::new(true)),
        );

        let outcome = worker.run_once().unwrap();
        assert_eq!(outcome.failures.len(), 1);
        let rows = sink.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].row.variable, "Pump");
        assert_eq!(rows[1].row.value, Variant::Null);
        assert_eq!(worker.stats().unresolved_total, 1);
    }

    #[test]
    fn test_connect_retries_with_backoff() {
        let client = tank_client();
        client.fail_next_connects(2);
        let (tx, rx) = unbounded();
        let mut worker = worker(settings(OutputMode::Rows), client, MemorySink::new()).with_events(tx);

        worker.ensure_connected().unwrap();
        assert_eq!(worker.stats().connect_attempts, 3);
        assert_eq!(worker.context().unwrap().namespace_index(), 1);
        assert_eq!(rx.try_recv().unwrap(), WorkerEvent::Connected { namespace_index: 1 });
    }

    #[test]
    fn test_missing_namespace_exhausts_retries() {
        let client = SimulatedClient::new("urn:other");
        let mut worker = worker(settings(OutputMode::Rows), client, MemorySink::new());

        let err = worker.ensure_connected().unwrap_err();
        assert!(matches!(err, UaTreeError::NamespaceNotFound { .. }));
        assert_eq!(worker.stats().connect_attempts, 3);
        assert!(!worker.is_connected());
    }

    #[test]
    fn test_read_failure_drops_session_then_reconnects() {
        let client = tank_client();
        client.fail_next_reads(1);
        let sink = MemorySink::new();
        let mut worker = worker(settings(OutputMode::Rows), client, sink.clone());

        let err = worker.run_once().unwrap_err();
        assert!(matches!(err, UaTreeError::Read(_)));
        assert!(!worker.is_connected());
        assert_eq!(sink.row_count(), 0);
        assert_eq!(worker.stats().failed_cycles, 1);

        worker.run_once().unwrap();
        assert_eq!(worker.stats().reconnects, 1);
        assert_eq!(sink.row_count(), 1);
    }

    #[test]
    fn test_cancelled_worker_publishes_nothing() {
        let sink = MemorySink::new();
        let mut worker = worker(settings(OutputMode::Both), tank_client(), sink.clone());
        worker.stop_handle().store(false, Ordering::SeqCst);

        assert!(matches!(worker.run_once(), Err(UaTreeError::Cancelled)));
        assert_eq!(sink.row_count(), 0);
        assert_eq!(sink.tree_count(), 0);
    }

    #[test]
    fn test_cancelled_mid_cycle_publishes_nothing() {
        let running = Arc::new(AtomicBool::new(true));
        let stop = running.clone();
        let mut client = MockUaClient::new();
        client.expect_connect().times(1).returning(|_| Ok(()));
        client.expect_namespace_index().returning(|_| Ok(1));
        client.expect_browse_children().returning(|_| Ok(Vec::new()));
        client.expect_is_connected().return_const(true);
        client.expect_disconnect().return_const(());
        client.expect_resolve_by_path().returning(move |path| {
            stop.store(false, Ordering::SeqCst);
            Ok(NodeHandle::new(path.join("/")))
        });
        client.expect_read_batch().never();

        let sink = MemorySink::new();
        let mut worker = PollWorker::new(
            settings(OutputMode::Both),
            Box::new(client),
            Box::new(sink.clone()),
            tank_plan(),
            running,
        );

        assert!(matches!(worker.run_once(), Err(UaTreeError::Cancelled)));
        assert_eq!(sink.row_count(), 0);
        assert_eq!(sink.tree_count(), 0);
        assert_eq!(sink.flush_count(), 0);
        assert_eq!(worker.stats().cycles, 0);
        assert_eq!(worker.stats().failed_cycles, 0);
    }

    #[test]
    fn test_row_sink_gets_rows_instead_of_trees() {
        for output in [OutputMode::Tree, OutputMode::Both] {
            let mut sink = MockSink::new();
            sink.expect_accepts_trees().return_const(false);
            sink.expect_publish_tree().never();
            sink.expect_publish_row()
                .times(1)
                .withf(|_, _, row| row.variable == "Tank.Temperature")
                .returning(|_, _, _| Ok(()));
            sink.expect_flush().times(1).returning(|| Ok(()));

            let mut worker = PollWorker::new(
                settings(output),
                Box::new(tank_client()),
                Box::new(sink),
                tank_plan(),
                Arc::new(AtomicBool::new(true)),
            );
            worker.run_once().unwrap();
            assert_eq!(worker.stats().rows_published, 1);
            assert_eq!(worker.stats().trees_published, 0);
        }
    }

    #[test]
    fn test_sink_error_fails_cycle_but_keeps_session() {
        let mut sink = MockSink::new();
        sink.expect_accepts_trees().return_const(true);
        sink.expect_publish_row()
            .times(1)
            .returning(|_, _, _| Err(UaTreeError::Sink("disk full".into())));
        sink.expect_flush().never();

        let mut worker = PollWorker::new(
            settings(OutputMode::Rows),
            Box::new(tank_client()),
            Box::new(sink),
            tank_plan(),
            Arc::new(AtomicBool::new(true)),
        );
        assert!(matches!(worker.run_once(), Err(UaTreeError::Sink(_))));
        assert!(worker.is_connected());
        assert_eq!(worker.stats().failed_cycles, 1);
    }

    #[test]
    fn test_run_stops_on_flag_and_closes_sink() {
        let sink = MemorySink::new();
        let (tx, rx) = unbounded();
        let mut worker = worker(settings(OutputMode::Rows), tank_client(), sink.clone()).with_events(tx);
        let stop = worker.stop_handle();

        let handle = std::thread::spawn(move || worker.run());
        loop {
            let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            if matches!(event, WorkerEvent::CycleCompleted(_)) {
                break;
            }
        }
        stop.store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();

        assert!(sink.row_count() >= 1);
        assert!(sink.is_closed());
        assert!(rx.iter().any(|e| e == WorkerEvent::Stopped));
    }
}
