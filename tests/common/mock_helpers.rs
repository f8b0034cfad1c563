//! Simulated server and worker construction helpers

use super::{TEST_ENDPOINT, TEST_NAMESPACE};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use uatree_rs::backend::{PollWorker, ReadPlan, SimulatedClient, ValuePattern, WorkerSettings};
use uatree_rs::config::{OutputMode, RetryConfig};
use uatree_rs::sink::Sink;
use uatree_rs::Variant;

/// A small production line with constant values:
///
/// ```text
/// Objects
///   Line1
///     Tank    { Temperature: 65.3, Pressure: 2.5 }
///     Pump    { Speed: 1450, Running: true }
///   Status: "OK"
/// ```
pub fn line_server() -> SimulatedClient {
    let mut client = SimulatedClient::new(TEST_NAMESPACE);
    client.add_variable(&["Line1", "Tank", "Temperature"], constant(Variant::Float(65.3)));
    client.add_variable(&["Line1", "Tank", "Pressure"], constant(Variant::Float(2.5)));
    client.add_variable(&["Line1", "Pump", "Speed"], constant(Variant::Int(1450)));
    client.add_variable(&["Line1", "Pump", "Running"], constant(Variant::Bool(true)));
    client.add_variable(&["Status"], constant(Variant::from("OK")));
    client
}

pub fn constant(value: Variant) -> ValuePattern {
    ValuePattern::Constant(value)
}

/// Fast settings for tests: short interval, millisecond backoff, three attempts
pub fn test_settings(output: OutputMode) -> WorkerSettings {
    WorkerSettings {
        endpoint: TEST_ENDPOINT.to_string(),
        namespace: TEST_NAMESPACE.to_string(),
        root_qualifier: "0:Objects".to_string(),
        max_concurrent_resolves: 4,
        publish_interval: Duration::from_millis(20),
        table: "opcuadata".to_string(),
        output,
        include_unset_rows: false,
        retry: RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 10,
            multiplier: 2.0,
            max_attempts: Some(3),
        },
    }
}

pub fn test_worker(
    settings: WorkerSettings,
    client: SimulatedClient,
    sink: impl Sink + 'static,
    plan: ReadPlan,
) -> PollWorker {
    PollWorker::new(
        settings,
        Box::new(client),
        Box::new(sink),
        plan,
        Arc::new(AtomicBool::new(true)),
    )
}
