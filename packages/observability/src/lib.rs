//! # Observability
//!
//! Centralized logging layer for the onboard workspace.
//!
//! Crates are **log producers** only. The binary calls
//! `observability::init_with_config()` once at startup and every other crate
//! uses plain `tracing` macros with structured fields. Nothing outside this
//! crate knows where log lines end up.
//!
//! Every event is written as one JSON object per line to
//! `~/.onboard/logs/onboard.jsonl` (or `LogConfig::log_path`), so
//! `tail -f ~/.onboard/logs/onboard.jsonl | jq` works out of the box.
//! Credential-bearing fields are redacted before they reach the file.
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "onboard".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!     tracing::info!("ready");
//! }
//! ```

mod json_layer;
mod writer;

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry, REDACTED, SENSITIVE_FIELDS};
pub use writer::{CentralLogWriter, WriterFactory};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info"). `RUST_LOG` wins when set.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.onboard/logs/onboard.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact, human-readable lines on stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Default central log file location.
pub fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".onboard")
        .join("logs")
        .join("onboard.jsonl")
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// If the log file cannot be opened the JSONL layer is skipped and logging
/// falls back to stderr only. Calling this twice is a no-op for the second
/// call.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let json_layer = match CentralLogWriter::new(&log_path) {
        Ok(writer) => Some(JsonLayer::new(
            config.service_name.clone(),
            WriterFactory::new(writer),
        )),
        Err(e) => {
            eprintln!("observability: failed to open {}: {}", log_path.display(), e);
            None
        }
    };
    let file_enabled = json_layer.is_some();

    let stderr_layer = if config.also_stderr || !file_enabled {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(std::io::stderr),
        )
    } else {
        None
    };

    let result = tracing_subscriber::registry()
        .with(json_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .with(stderr_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .try_init();

    if result.is_ok() && file_enabled {
        tracing::debug!(log_path = %log_path.display(), "observability initialized");
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_default_log_path_is_jsonl() {
        let path = default_log_path();
        assert_eq!(path.file_name().unwrap(), "onboard.jsonl");
        assert!(path.parent().unwrap().ends_with("logs"));
    }
}
