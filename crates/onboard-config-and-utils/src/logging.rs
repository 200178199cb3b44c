//! Logging initialization.
//!
//! Thin wrapper over the observability crate. Every command writes
//! structured JSONL to `<base>/logs/onboard.jsonl`.

use crate::config::non_empty;
use crate::Paths;
use observability::LogConfig;

/// Initialize the logging system.
///
/// `ONBOARD_LOG_STDERR=1` additionally mirrors log lines to stderr.
pub fn init_logging(level: &str, paths: &Paths) {
    let also_stderr = std::env::var("ONBOARD_LOG_STDERR")
        .ok()
        .and_then(non_empty)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    observability::init_with_config(LogConfig {
        service_name: "onboard".into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr,
    });
}
