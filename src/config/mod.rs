//! Configuration module for uatree-rs
//!
//! Configuration is layered:
//!
//! 1. built-in defaults ([`AppConfig::default`])
//! 2. an optional TOML file ([`AppConfig::load_file`])
//! 3. environment overrides ([`AppConfig::apply_env`])
//!
//! # Environment
//!
//! | Variable                      | Field                                     |
//! |-------------------------------|-------------------------------------------|
//! | `OPCUA_URL`, `OPCUA_ENDPOINT` | `connection.endpoint`                     |
//! | `OPCUA_NAMESPACE`             | `connection.namespace`                    |
//! | `OPCUA_VARIABLES`             | `variables` (multiline input is cleaned)  |
//! | `PUBLISH_INTERVAL`            | `collection.publish_interval_secs`        |
//! | `OPCUA_TABLE`                 | `collection.table`                        |
//! | `DATA_SUBFOLDER`              | CSV sink directory                        |
//! | `MAX_ROWS_PER_FILE`           | CSV sink rotation by rows                 |
//! | `MAX_TIME_PER_FILE`           | CSV sink rotation by age, seconds         |
//! | `LOG_DIR`                     | `logging.log_dir`                         |
//!
//! Any of the three CSV variables switches the sink to CSV.
//!
//! # Example
//!
//! ```toml
//! variables = '{"Tank": "Temperature"}'
//!
//! [connection]
//! endpoint = "opc.tcp://plc.local:4840"
//! namespace = "urn:factory:line1"
//!
//! [collection]
//! publish_interval_secs = 5
//! output = "both"
//!
//! [sink]
//! kind = "csv"
//! directory = "/shared/opc_ua_client"
//! ```

pub mod document;

pub use document::{clean_multiline_env_var, VariablesDocument};

use crate::error::{Result, ResultExt, UaTreeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.uatree-rs";

pub const DEFAULT_ENDPOINT: &str = "opc.tcp://localhost:4840/opcuaserver";

pub const DEFAULT_NAMESPACE: &str = "example:ironflock:com";

pub const DEFAULT_VARIABLES: &str = r#"{"Tank": "Temperature"}"#;

/// Root container every browse path starts from
pub const DEFAULT_ROOT_QUALIFIER: &str = "0:Objects";

pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 3;

pub const DEFAULT_TABLE: &str = "opcuadata";

pub const DEFAULT_MAX_CONCURRENT_RESOLVES: usize = 8;

pub const DEFAULT_DATA_SUBFOLDER: &str = "opc_ua_client";

pub const DEFAULT_MAX_ROWS_PER_FILE: u64 = 50;

pub const DEFAULT_MAX_TIME_PER_FILE_SECS: u64 = 30;

/// File name prefix of rotated CSV files
pub const CSV_FILE_PREFIX: &str = "OPC_UA_CLIENT";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Directory used for CSV output when none is configured
pub fn default_data_dir(subfolder: &str) -> PathBuf {
    app_data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(subfolder)
}

// ==================== App Config ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Raw variables document, schema or node set
    pub variables: String,
    pub connection: ConnectionConfig,
    pub collection: CollectionConfig,
    pub sink: SinkConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            variables: DEFAULT_VARIABLES.to_string(),
            connection: ConnectionConfig::default(),
            collection: CollectionConfig::default(),
            sink: SinkConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then `path` if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(UaTreeError::from)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| UaTreeError::Configuration(format!("Failed to parse TOML: {}", e)))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| UaTreeError::Serialization(e.to_string()))
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Empty values are ignored. Malformed numbers are configuration errors.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = get("OPCUA_URL").or_else(|| get("OPCUA_ENDPOINT")) {
            self.connection.endpoint = endpoint.trim().to_string();
        }
        if let Some(namespace) = get("OPCUA_NAMESPACE") {
            self.connection.namespace = namespace.trim().to_string();
        }
        if let Some(variables) = get("OPCUA_VARIABLES") {
            self.variables = clean_multiline_env_var(&variables);
        }
        if let Some(interval) = get("PUBLISH_INTERVAL") {
            self.collection.publish_interval_secs = parse_env_number("PUBLISH_INTERVAL", &interval)?;
        }
        if let Some(table) = get("OPCUA_TABLE") {
            self.collection.table = table.trim().to_string();
        }
        if let Some(subfolder) = get("DATA_SUBFOLDER") {
            self.sink.csv_mut().directory = default_data_dir(subfolder.trim());
        }
        if let Some(rows) = get("MAX_ROWS_PER_FILE") {
            self.sink.csv_mut().max_rows_per_file = parse_env_number("MAX_ROWS_PER_FILE", &rows)?;
        }
        if let Some(secs) = get("MAX_TIME_PER_FILE") {
            self.sink.csv_mut().max_time_per_file_secs = parse_env_number("MAX_TIME_PER_FILE", &secs)?;
        }
        if let Some(dir) = get("LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir.trim()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.endpoint.trim().is_empty() {
            return Err(UaTreeError::config("connection.endpoint must not be empty"));
        }
        if self.connection.namespace.trim().is_empty() {
            return Err(UaTreeError::config("connection.namespace must not be empty"));
        }
        if self.connection.root_qualifier.trim().is_empty() {
            return Err(UaTreeError::config("connection.root_qualifier must not be empty"));
        }
        if self.connection.max_concurrent_resolves == 0 {
            return Err(UaTreeError::config(
                "connection.max_concurrent_resolves must be at least 1",
            ));
        }
        if self.collection.publish_interval_secs == 0 {
            return Err(UaTreeError::config(
                "collection.publish_interval_secs must be at least 1",
            ));
        }
        if self.collection.table.trim().is_empty() {
            return Err(UaTreeError::config("collection.table must not be empty"));
        }
        if let SinkConfig::Csv(csv) = &self.sink {
            if csv.max_rows_per_file == 0 || csv.max_time_per_file_secs == 0 {
                return Err(UaTreeError::config(
                    "CSV rotation limits must be at least 1",
                ));
            }
        }
        if self.retry.multiplier < 1.0 {
            return Err(UaTreeError::config("retry.multiplier must be >= 1.0"));
        }
        Ok(())
    }

    pub fn variables_document(&self) -> Result<VariablesDocument> {
        VariablesDocument::parse(&self.variables)
    }

    /// Namespace name to look up on the server; an exported node set may
    /// carry its own
    pub fn effective_namespace<'a>(&'a self, document: &'a VariablesDocument) -> &'a str {
        document
            .namespace_override()
            .unwrap_or(&self.connection.namespace)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.collection.publish_interval_secs)
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        UaTreeError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

// ==================== Connection Config ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server endpoint URL
    pub endpoint: String,

    /// Namespace name, looked up in the server's namespace array at connect time
    pub namespace: String,

    /// Qualified name of the root container
    pub root_qualifier: String,

    /// Upper bound on in-flight path resolutions
    pub max_concurrent_resolves: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            root_qualifier: DEFAULT_ROOT_QUALIFIER.to_string(),
            max_concurrent_resolves: DEFAULT_MAX_CONCURRENT_RESOLVES,
        }
    }
}

// ==================== Collection Config ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectionConfig {
    /// Seconds between the start of two cycles
    pub publish_interval_secs: u64,

    /// Table name handed to the sink
    pub table: String,

    pub output: OutputMode,

    /// Emit `null` rows for leaves that could not be resolved
    pub include_unset_rows: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            publish_interval_secs: DEFAULT_PUBLISH_INTERVAL_SECS,
            table: DEFAULT_TABLE.to_string(),
            output: OutputMode::Rows,
            include_unset_rows: false,
        }
    }
}

/// What each cycle publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// One flat row per leaf
    #[default]
    Rows,
    /// The populated tree as a single document
    Tree,
    Both,
}

impl OutputMode {
    pub fn publishes_rows(&self) -> bool {
        matches!(self, OutputMode::Rows | OutputMode::Both)
    }

    pub fn publishes_tree(&self) -> bool {
        matches!(self, OutputMode::Tree | OutputMode::Both)
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputMode::Rows => write!(f, "rows"),
            OutputMode::Tree => write!(f, "tree"),
            OutputMode::Both => write!(f, "rows+tree"),
        }
    }
}

// ==================== Sink Config ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// JSON lines on stdout
    #[default]
    Stdout,
    /// JSON lines appended to a file
    JsonLines { path: PathBuf },
    /// Rotating CSV files
    Csv(CsvSinkConfig),
}

impl SinkConfig {
    /// CSV settings, switching to a default CSV sink first if needed
    pub fn csv_mut(&mut self) -> &mut CsvSinkConfig {
        if !matches!(self, SinkConfig::Csv(_)) {
            *self = SinkConfig::Csv(CsvSinkConfig::default());
        }
        match self {
            SinkConfig::Csv(csv) => csv,
            _ => unreachable!("sink was just switched to CSV"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CsvSinkConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
    /// Rows written before a new file is started
    pub max_rows_per_file: u64,
    /// Seconds before a new file is started
    pub max_time_per_file_secs: u64,
    /// Seconds between flushes of the open file
    pub flush_interval_secs: u64,
}

impl Default for CsvSinkConfig {
    fn default() -> Self {
        Self {
            directory: default_data_dir(DEFAULT_DATA_SUBFOLDER),
            file_prefix: CSV_FILE_PREFIX.to_string(),
            max_rows_per_file: DEFAULT_MAX_ROWS_PER_FILE,
            max_time_per_file_secs: DEFAULT_MAX_TIME_PER_FILE_SECS,
            flush_interval_secs: 5,
        }
    }
}

// ==================== Retry Config ====================

/// Exponential backoff between reconnect attempts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Give up after this many consecutive failures; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

// ==================== Logging Config ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stdout only when unset
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is not set
    pub filter: Option<String>,
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.connection.root_qualifier, "0:Objects");
        assert_eq!(config.collection.publish_interval_secs, 3);
        assert_eq!(config.collection.table, "opcuadata");
        assert_eq!(config.sink, SinkConfig::Stdout);
        assert!(config.validate().is_ok());
        assert_eq!(config.variables_document().unwrap().kind(), "schema");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("OPCUA_URL", "opc.tcp://plc:4840"),
                ("OPCUA_NAMESPACE", "urn:line1"),
                ("PUBLISH_INTERVAL", "10"),
                ("OPCUA_TABLE", "line1data"),
                ("LOG_DIR", "/var/log/uatree"),
            ]))
            .unwrap();
        assert_eq!(config.connection.endpoint, "opc.tcp://plc:4840");
        assert_eq!(config.connection.namespace, "urn:line1");
        assert_eq!(config.collection.publish_interval_secs, 10);
        assert_eq!(config.collection.table, "line1data");
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("/var/log/uatree")));
        assert_eq!(config.sink, SinkConfig::Stdout);
    }

    #[test]
    fn test_url_takes_precedence_over_endpoint() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("OPCUA_URL", "opc.tcp://a"), ("OPCUA_ENDPOINT", "opc.tcp://b")]))
            .unwrap();
        assert_eq!(config.connection.endpoint, "opc.tcp://a");
    }

    #[test]
    fn test_env_variables_are_cleaned() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("OPCUA_VARIABLES", "{\\n  \"Pump\": \"Speed\"\\n}")]))
            .unwrap();
        assert_eq!(config.variables, r#"{"Pump": "Speed"}"#);
    }

    #[test]
    fn test_csv_env_switches_sink() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("MAX_ROWS_PER_FILE", "100"), ("MAX_TIME_PER_FILE", "60")]))
            .unwrap();
        match &config.sink {
            SinkConfig::Csv(csv) => {
                assert_eq!(csv.max_rows_per_file, 100);
                assert_eq!(csv.max_time_per_file_secs, 60);
                assert_eq!(csv.file_prefix, CSV_FILE_PREFIX);
            }
            other => panic!("expected CSV sink, got {:?}", other),
        }
    }

    #[test]
    fn test_absolute_data_subfolder() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("DATA_SUBFOLDER", "/shared/out")])).unwrap();
        assert_eq!(config.sink.csv_mut().directory, PathBuf::from("/shared/out"));
    }

    #[test]
    fn test_malformed_number_is_config_error() {
        let mut config = AppConfig::default();
        let err = config.apply_env(env(&[("PUBLISH_INTERVAL", "soon")])).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("PUBLISH_INTERVAL"));
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("OPCUA_NAMESPACE", "  ")])).unwrap();
        assert_eq!(config.connection.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.collection.publish_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.connection.namespace.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.connection.max_concurrent_resolves = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            variables = '[{"NodeId": "ns=1;s=Tank.Level", "BrowseName": "Level"}]'

            [connection]
            endpoint = "opc.tcp://plc:4840"

            [collection]
            output = "both"

            [sink]
            kind = "json_lines"
            path = "/tmp/rows.jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.endpoint, "opc.tcp://plc:4840");
        assert_eq!(config.connection.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.collection.output, OutputMode::Both);
        assert_eq!(
            config.sink,
            SinkConfig::JsonLines {
                path: PathBuf::from("/tmp/rows.jsonl")
            }
        );
        assert_eq!(config.variables_document().unwrap().kind(), "node set");
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::default();
        config.sink.csv_mut().max_rows_per_file = 7;
        let text = config.to_toml_string().unwrap();
        assert_eq!(AppConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_effective_namespace() {
        let config = AppConfig::default();
        let schema = config.variables_document().unwrap();
        assert_eq!(config.effective_namespace(&schema), DEFAULT_NAMESPACE);

        let exported = VariablesDocument::parse(
            r#"{"NamespaceUris": ["urn:x"], "UAVariables": []}"#,
        )
        .unwrap();
        assert_eq!(config.effective_namespace(&exported), "urn:x");
    }

    #[test]
    fn test_backoff_delays() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(20), Duration::from_millis(10_000));
        assert!(!retry.exhausted(1_000));

        let bounded = RetryConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(bounded.exhausted(3));
    }
}
