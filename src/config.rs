//! Demo/bootstrap configuration — log level/format, broker mailbox sizing,
//! and the seed services the demo binary starts with. Not a config layer
//! for the monitor core itself: `Service` records are the only config the
//! core understands, supplied through `PersistencePort`.

use std::path::Path;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Bootstrap config for `sentinel-demo`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Config {
    /// Optional log level (e.g. INFO, DEBUG); falls back to `$RUST_LOG`,
    /// then `info`.
    #[serde(default)]
    pub log_level: Option<String>,
    /// Emit logs as JSON lines instead of the default human-readable format.
    #[serde(default)]
    pub json_logging: bool,
    /// Mailbox capacity for each broker subscriber.
    #[serde(default = "default_broker_mailbox_size")]
    pub broker_mailbox_size: usize,
    /// How long the scheduler waits for in-flight checks on shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_broker_mailbox_size() -> usize {
    256
}

fn default_shutdown_grace_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            json_logging: false,
            broker_mailbox_size: default_broker_mailbox_size(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Load bootstrap config from a JSON or YAML file, dispatching on the file
/// extension (`.yaml`/`.yml` -> YAML, anything else -> JSON).
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    let bytes = std::fs::read(path_ref)
        .with_context(|| format!("failed to read config file {path_ref:?}"))?;
    let ext = path_ref
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| "json".to_string());
    let cfg: Config = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_slice(&bytes).context("failed to parse YAML config")?,
        _ => serde_json::from_slice(&bytes).context("failed to parse JSON config")?,
    };
    Ok(cfg)
}

/// Set the global `tracing` subscriber: `$RUST_LOG`/`log_level` picks the
/// filter, `json_logging` picks the formatter.
pub fn init_logging(cfg: &Config) {
    let env_filter = if let Some(level) = &cfg.log_level {
        EnvFilter::new(level)
    } else if let Ok(level) = std::env::var("RUST_LOG") {
        EnvFilter::new(level)
    } else {
        EnvFilter::new("info")
    };

    if cfg.json_logging {
        let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).json().finish();
        tracing::subscriber::set_global_default(subscriber).expect("failed to set global subscriber");
    } else {
        let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).finish();
        tracing::subscriber::set_global_default(subscriber).expect("failed to set global subscriber");
    }
}
