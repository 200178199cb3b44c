//! Core configuration, validation, paths and logging for the onboard client.

mod config;
mod error;
mod logging;
mod paths;
mod validation;

pub use config::{
    Config, DEFAULT_LOG_LEVEL, DEFAULT_PROBE_ENDPOINTS, DEFAULT_PROBE_TIMEOUT_MS,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
pub use validation::{
    is_placeholder_url, validate, ConfigIssue, ConfigReport, ConfigWarning, MIN_ANON_KEY_LEN,
    PLACEHOLDER_ANON_KEYS, PLACEHOLDER_SUPABASE_URLS,
};
