use once_cell::sync::Lazy;
use tracing::warn;

use crate::{QueueError, QueueResult};

/// Format version written into persisted queues
pub const QUEUE_FORMAT_VERSION: u32 = 1;

/// Index names whose change requires descendants to be reindexed too
pub const DEFAULT_SECURITY_INDEXES: &[&str] = &["allowedRolesAndUsers"];

/// Environment switch that disables operation collapsing
pub const OPTIMIZATION_DISABLED_ENV: &str = "CATALOG_OPTIMIZATION_DISABLED";

/// Environment override for the security index list (comma separated)
pub const SECURITY_INDEXES_ENV: &str = "INDEX_QUEUE_SECURITY_INDEXES";

/// Runtime settings for newly created queues and the event subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Collapse the log before dispatch (otherwise dispatch it raw)
    pub optimization_enabled: bool,
    /// Attribute names that trigger the security cascade on modification
    pub security_indexes: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            optimization_enabled: true,
            security_indexes: DEFAULT_SECURITY_INDEXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl QueueConfig {
    /// Build the configuration from process environment variables.
    ///
    /// Invalid values are logged and replaced with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(OPTIMIZATION_DISABLED_ENV) {
            match parse_flag(OPTIMIZATION_DISABLED_ENV, &raw) {
                Ok(disabled) => config.optimization_enabled = !disabled,
                Err(e) => warn!("{e}; keeping optimization enabled"),
            }
        }

        if let Some(raw) = lookup(SECURITY_INDEXES_ENV) {
            match parse_index_list(SECURITY_INDEXES_ENV, &raw) {
                Ok(indexes) => config.security_indexes = indexes,
                Err(e) => warn!("{e}; using default security indexes"),
            }
        }

        config
    }

    /// Is `attribute` one of the security-relevant indexes?
    pub fn is_security_index(&self, attribute: &str) -> bool {
        self.security_indexes.iter().any(|s| s == attribute)
    }
}

static CONFIG: Lazy<QueueConfig> = Lazy::new(QueueConfig::from_env);

/// Process-wide configuration, read from the environment on first use
pub fn current() -> &'static QueueConfig {
    &CONFIG
}

fn parse_flag(setting: &str, raw: &str) -> QueueResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        _ => Err(QueueError::ConfigError {
            setting: setting.to_string(),
            value: raw.to_string(),
            reason: "expected a boolean flag".to_string(),
        }),
    }
}

fn parse_index_list(setting: &str, raw: &str) -> QueueResult<Vec<String>> {
    let indexes: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if indexes.is_empty() {
        return Err(QueueError::ConfigError {
            setting: setting.to_string(),
            value: raw.to_string(),
            reason: "index list is empty".to_string(),
        });
    }
    Ok(indexes)
}
