//! Startup validation of the service endpoint and anon key.
//!
//! Runs before any network activity. Errors block startup, warnings are only
//! reported.

use crate::{Config, CoreError, CoreResult};
use std::fmt;
use url::{Host, Url};

/// Endpoint values shipped in templates and `.env.example` files.
pub const PLACEHOLDER_SUPABASE_URLS: &[&str] = &[
    "https://your-project.supabase.co",
    "https://your-project-ref.supabase.co",
    "https://your-project-id.supabase.co",
    "https://example.supabase.co",
    "your_supabase_url",
    "your-supabase-url",
];

/// Anon key values shipped in templates.
pub const PLACEHOLDER_ANON_KEYS: &[&str] = &[
    "your-anon-key",
    "your_supabase_anon_key",
    "your-supabase-anon-key",
];

/// Anon keys shorter than this are suspicious (real keys are long JWTs).
pub const MIN_ANON_KEY_LEN: usize = 100;

/// Blocking configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    MissingUrl,
    PlaceholderUrl(String),
    MalformedUrl { value: String, reason: String },
    InsecureUrl(String),
    UnexpectedUrlShape(String),
    MissingAnonKey,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::MissingUrl => write!(
                f,
                "SUPABASE_URL is not set; export ONBOARD_SUPABASE_URL or add supabase_url to config.json"
            ),
            ConfigIssue::PlaceholderUrl(value) => write!(
                f,
                "SUPABASE_URL is still the template placeholder ({value}); replace it with your project URL"
            ),
            ConfigIssue::MalformedUrl { value, reason } => {
                write!(f, "SUPABASE_URL '{value}' is not a valid URL: {reason}")
            }
            ConfigIssue::InsecureUrl(value) => {
                write!(f, "SUPABASE_URL '{value}' must use https")
            }
            ConfigIssue::UnexpectedUrlShape(value) => write!(
                f,
                "SUPABASE_URL '{value}' must look like https://<project>.<host> with no path"
            ),
            ConfigIssue::MissingAnonKey => write!(
                f,
                "SUPABASE_ANON_KEY is not set; export ONBOARD_SUPABASE_ANON_KEY or add supabase_anon_key to config.json"
            ),
        }
    }
}

/// Non-blocking configuration smell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    PlaceholderAnonKey,
    AnonKeyNotJwt,
    AnonKeyTooShort { len: usize },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::PlaceholderAnonKey => {
                write!(f, "SUPABASE_ANON_KEY looks like a template placeholder")
            }
            ConfigWarning::AnonKeyNotJwt => write!(
                f,
                "SUPABASE_ANON_KEY does not look like a JWT (expected three dot-separated segments)"
            ),
            ConfigWarning::AnonKeyTooShort { len } => write!(
                f,
                "SUPABASE_ANON_KEY is only {len} characters (expected at least {MIN_ANON_KEY_LEN})"
            ),
        }
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigReport {
    pub errors: Vec<ConfigIssue>,
    pub warnings: Vec<ConfigWarning>,
}

impl ConfigReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fail on errors, hand back warnings otherwise.
    pub fn into_result(self) -> CoreResult<Vec<ConfigWarning>> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(CoreError::InvalidConfig(self.errors))
        }
    }
}

/// True when `url` is one of the known template placeholders.
pub fn is_placeholder_url(url: &str) -> bool {
    let normalized = url.trim().trim_end_matches('/');
    PLACEHOLDER_SUPABASE_URLS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(normalized))
}

/// Validate endpoint URL and anon key. Performs no I/O.
pub fn validate(config: &Config) -> ConfigReport {
    let mut report = ConfigReport::default();

    if let Some(issue) = check_url(config.supabase_url.trim(), config.allow_local_endpoint) {
        report.errors.push(issue);
    }

    let key = config.supabase_anon_key.trim();
    if key.is_empty() {
        report.errors.push(ConfigIssue::MissingAnonKey);
    } else {
        if PLACEHOLDER_ANON_KEYS
            .iter()
            .any(|p| p.eq_ignore_ascii_case(key))
        {
            report.warnings.push(ConfigWarning::PlaceholderAnonKey);
        }
        if !looks_like_jwt(key) {
            report.warnings.push(ConfigWarning::AnonKeyNotJwt);
        }
        if key.len() < MIN_ANON_KEY_LEN {
            report
                .warnings
                .push(ConfigWarning::AnonKeyTooShort { len: key.len() });
        }
    }

    for warning in &report.warnings {
        tracing::warn!(warning = %warning, "configuration warning");
    }

    report
}

fn check_url(raw: &str, allow_local: bool) -> Option<ConfigIssue> {
    if raw.is_empty() {
        return Some(ConfigIssue::MissingUrl);
    }
    if is_placeholder_url(raw) {
        return Some(ConfigIssue::PlaceholderUrl(raw.to_string()));
    }

    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => {
            return Some(ConfigIssue::MalformedUrl {
                value: raw.to_string(),
                reason: e.to_string(),
            })
        }
    };

    let local = is_local_host(&parsed);
    if allow_local && local && matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    if parsed.scheme() != "https" {
        return Some(ConfigIssue::InsecureUrl(raw.to_string()));
    }

    let host_ok = match parsed.host() {
        Some(Host::Domain(domain)) => {
            let labels: Vec<&str> = domain.split('.').collect();
            labels.len() >= 3 && labels.iter().all(|l| valid_label(l))
        }
        _ => false,
    };
    let bare = matches!(parsed.path(), "" | "/") && parsed.query().is_none();

    if !host_ok || !bare {
        return Some(ConfigIssue::UnexpectedUrlShape(raw.to_string()));
    }

    None
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_local_host(url: &Url) -> bool {
    matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    )
}

fn looks_like_jwt(key: &str) -> bool {
    let segments: Vec<&str> = key.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|s| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '=')
        })
}
