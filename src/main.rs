//! uatree - Main Entry Point
//!
//! Polls a set of OPC UA variables, rebuilds them into the configured tree
//! shape and publishes trees and flattened rows to the configured sink.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uatree_rs::{
    backend::{PollWorker, ReadPlan, SimulatedClient, WorkerSettings},
    config::{AppConfig, LoggingConfig, VariablesDocument},
    sink::{build_sink, MemorySink},
    tree::Flattener,
};

const DEFAULT_LOG_FILTER: &str = "info,uatree_rs=debug";

#[derive(Parser)]
#[command(name = "uatree", version, about = "Read OPC UA variables into nested trees and flat rows")]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll until interrupted
    Run,
    /// Run a single cycle and print the result
    Once,
    /// Print the resolution targets of the configured variables
    Plan,
    /// Flatten a JSON tree document into rows
    Flatten {
        /// Input file, `-` for stdin
        input: String,
        /// Emit `null` rows for unset leaves
        #[arg(long)]
        include_unset: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = init_logging(&config.logging)?;

    match cli.command {
        Command::Run => run(config),
        Command::Once => once(config),
        Command::Plan => plan(config),
        Command::Flatten {
            input,
            include_unset,
        } => flatten(&input, include_unset),
    }
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let default_filter = logging.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (file_layer, guard) = match &logging.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "uatree.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Parse the variables document and derive everything the worker needs
fn prepare(config: &AppConfig) -> anyhow::Result<(VariablesDocument, ReadPlan, String)> {
    let document = config
        .variables_document()
        .context("Invalid variables document")?;
    let plan = ReadPlan::from_document(&document)?;
    let namespace = config.effective_namespace(&document).to_string();
    tracing::info!(
        "Loaded {} document with {} variables (namespace '{}')",
        document.kind(),
        plan.len(),
        namespace
    );
    Ok((document, plan, namespace))
}

/// The binary ships without a wire client; values are generated per leaf
fn simulated_client(config: &AppConfig, plan: &ReadPlan, namespace: &str) -> SimulatedClient {
    tracing::warn!(
        "No OPC UA transport is built in: serving {} generated variables in place of {}",
        plan.len(),
        config.connection.endpoint
    );
    SimulatedClient::mirroring(plan, namespace)
}

fn run(config: AppConfig) -> anyhow::Result<()> {
    let (_, plan, namespace) = prepare(&config)?;
    let client = simulated_client(&config, &plan, &namespace);
    let sink = build_sink(&config.sink)?;
    let running = Arc::new(AtomicBool::new(true));

    let stop = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, stopping");
        stop.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    tracing::info!(
        "Polling simulated {} every {:?}",
        config.connection.endpoint,
        config.publish_interval()
    );
    let mut worker = PollWorker::new(
        WorkerSettings::from_config(&config, &namespace),
        Box::new(client),
        sink,
        plan,
        running,
    );

    let handle = std::thread::Builder::new()
        .name("poll-worker".to_string())
        .spawn(move || worker.run())
        .context("Failed to spawn poll worker")?;

    match handle.join() {
        Ok(result) => result.context("Poll worker failed"),
        Err(_) => anyhow::bail!("Poll worker panicked"),
    }
}

fn once(config: AppConfig) -> anyhow::Result<()> {
    let (_, plan, namespace) = prepare(&config)?;
    let client = simulated_client(&config, &plan, &namespace);
    let sink = MemorySink::new();
    let mut worker = PollWorker::new(
        WorkerSettings::from_config(&config, &namespace),
        Box::new(client),
        Box::new(sink.clone()),
        plan,
        Arc::new(AtomicBool::new(true)),
    );

    let outcome = worker.run_once();
    worker.shutdown();
    let outcome = outcome.context("Cycle failed")?;

    for failure in &outcome.failures {
        tracing::warn!("Unresolved: {}", failure);
    }
    for published in sink.trees() {
        println!("{}", serde_json::to_string_pretty(&published.tree)?);
    }
    for published in sink.rows() {
        println!("{}", serde_json::to_string(&published.row)?);
    }
    Ok(())
}

fn plan(config: AppConfig) -> anyhow::Result<()> {
    let (_, plan, namespace) = prepare(&config)?;
    let document = serde_json::json!({
        "source": format!("{:?}", plan.source()),
        "namespace": namespace,
        "targets": plan.targets(),
        "shape": plan.shape(),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

fn flatten(input: &str, include_unset: bool) -> anyhow::Result<()> {
    let text = if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        text
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?
    };

    let document: serde_json::Value = serde_json::from_str(&text).context("Input is not valid JSON")?;
    let rows = Flattener::new()
        .with_unset_rows(include_unset)
        .flatten_json(&document)?;
    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}
