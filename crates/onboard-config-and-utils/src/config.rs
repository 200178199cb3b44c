//! Configuration management.
//!
//! Values come from (lowest to highest precedence) built-in defaults, the
//! JSON config file at `<base>/config.json`, and environment variables.

use crate::{CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Reachability probe targets, tried in order.
pub const DEFAULT_PROBE_ENDPOINTS: &[&str] = &[
    "https://www.google.com/generate_204",
    "https://cloudflare.com/cdn-cgi/trace",
];

/// Reachability probe timeout.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default)]
    pub supabase_url: String,
    /// Supabase anon (public) API key.
    #[serde(default)]
    pub supabase_anon_key: String,
    /// Endpoints used by the reachability probe.
    #[serde(default = "default_probe_endpoints")]
    pub probe_endpoints: Vec<String>,
    /// Per-request timeout of the reachability probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Accept `http://localhost` / `http://127.0.0.1` endpoints (local stack).
    #[serde(default)]
    pub allow_local_endpoint: bool,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_probe_endpoints() -> Vec<String> {
    DEFAULT_PROBE_ENDPOINTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_probe_timeout_ms() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            probe_endpoints: default_probe_endpoints(),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            allow_local_endpoint: false,
        }
    }
}

impl Config {
    /// Defaults overridden from the process environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Load from `<base>/config.json` when present, then apply the environment.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `<base>/config.json`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override fields from environment variables resolved by `lookup`.
    ///
    /// `ONBOARD_*` names win over the bare `SUPABASE_*` names.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).and_then(non_empty))
        };

        if let Some(level) = read(&["ONBOARD_LOG_LEVEL"]) {
            self.log_level = level;
        }
        if let Some(url) = read(&["ONBOARD_SUPABASE_URL", "SUPABASE_URL"]) {
            self.supabase_url = url;
        }
        if let Some(key) = read(&["ONBOARD_SUPABASE_ANON_KEY", "SUPABASE_ANON_KEY"]) {
            self.supabase_anon_key = key;
        }
        if let Some(timeout) = read(&["ONBOARD_PROBE_TIMEOUT_MS"]).and_then(|v| v.parse().ok()) {
            self.probe_timeout_ms = timeout;
        }
        if let Some(flag) = read(&["ONBOARD_ALLOW_LOCAL_ENDPOINT"]) {
            self.allow_local_endpoint = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// Supabase URL without a trailing slash.
    pub fn api_url(&self) -> &str {
        self.supabase_url.trim().trim_end_matches('/')
    }
}

pub(crate) fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.supabase_url.is_empty());
        assert_eq!(config.probe_endpoints.len(), 2);
        assert_eq!(config.probe_timeout_ms, 3_000);
        assert!(!config.allow_local_endpoint);
    }

    #[test]
    fn test_env_overrides_prefer_onboard_prefix() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("SUPABASE_URL", "https://bare.supabase.co"),
            ("ONBOARD_SUPABASE_URL", "https://prefixed.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("ONBOARD_LOG_LEVEL", "debug"),
        ]));

        assert_eq!(config.supabase_url, "https://prefixed.supabase.co");
        assert_eq!(config.supabase_anon_key, "anon");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.supabase_url = "https://kept.supabase.co".to_string();
        config.apply_env(env(&[("SUPABASE_URL", "   ")]));
        assert_eq!(config.supabase_url, "https://kept.supabase.co");
    }

    #[test]
    fn test_config_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{ "log_level": "debug", "supabase_url": "https://abc.supabase.co" }"#,
        )
        .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.supabase_url, "https://abc.supabase.co");
        assert_eq!(config.probe_timeout_ms, DEFAULT_PROBE_TIMEOUT_MS);
    }

    #[test]
    fn test_config_save_and_load_file() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.supabase_url = "https://saved.supabase.co".to_string();
        config.probe_timeout_ms = 1_500;
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.supabase_url, "https://saved.supabase.co");
        assert_eq!(loaded.probe_timeout_ms, 1_500);
    }

    #[test]
    fn test_api_url_trims_trailing_slash() {
        let mut config = Config::default();
        config.supabase_url = "https://abc.supabase.co/".to_string();
        assert_eq!(config.api_url(), "https://abc.supabase.co");
    }
}
