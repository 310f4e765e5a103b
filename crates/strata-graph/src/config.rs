//! Engine configuration
//!
//! Loaded from TOML; every field has a default so partial files work.
//!
//! ```toml
//! prefetch_concurrency = 3
//! content_window = 0
//!
//! [record_retry]
//! max_attempts = 5
//! delay_ms = 500
//! priority = "utility"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use strata_store::{Priority, RetryPolicy, StorePolicy};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Priority class recursive operations are issued on
    pub recursive_priority: Priority,
    /// Story prefetches allowed to run at once
    pub prefetch_concurrency: usize,
    /// Moments requested per content call; 0 means all
    pub content_window: usize,
    /// Remote policy for structured records
    pub record_retry: RetryPolicy,
    /// Remote policy for media files
    pub file_retry: RetryPolicy,
    /// Policy for on-device tiers
    pub local_retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            recursive_priority: Priority::UserInitiated,
            prefetch_concurrency: 3,
            content_window: 0,
            record_retry: RetryPolicy::record(),
            file_retry: RetryPolicy::file(),
            local_retry: RetryPolicy::local(),
        }
    }
}

impl SyncConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the record retry policy
    #[must_use]
    pub fn with_record_retry(mut self, policy: RetryPolicy) -> Self {
        self.record_retry = policy;
        self
    }

    /// Set the file retry policy
    #[must_use]
    pub fn with_file_retry(mut self, policy: RetryPolicy) -> Self {
        self.file_retry = policy;
        self
    }

    /// Set the local retry policy
    #[must_use]
    pub fn with_local_retry(mut self, policy: RetryPolicy) -> Self {
        self.local_retry = policy;
        self
    }

    /// Set prefetch concurrency
    #[must_use]
    pub fn with_prefetch_concurrency(mut self, n: usize) -> Self {
        self.prefetch_concurrency = n;
        self
    }

    /// Set the content window
    #[must_use]
    pub fn with_content_window(mut self, n: usize) -> Self {
        self.content_window = n;
        self
    }

    /// Store policy for record kinds
    #[must_use]
    pub fn record_policy(&self) -> StorePolicy {
        StorePolicy {
            local: self.local_retry,
            remote: self.record_retry,
        }
    }

    /// Store policy for media files
    #[must_use]
    pub fn file_policy(&self) -> StorePolicy {
        StorePolicy {
            local: self.local_retry,
            remote: self.file_retry,
        }
    }

    /// Parse and validate TOML
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, policy) in [
            ("record_retry", &self.record_retry),
            ("file_retry", &self.file_retry),
            ("local_retry", &self.local_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }
        if self.prefetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "prefetch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_store_presets() {
        let config = SyncConfig::default();
        assert_eq!(config.record_retry.max_attempts, 5);
        assert_eq!(config.record_retry.delay_ms, 500);
        assert_eq!(config.file_retry.max_attempts, 3);
        assert_eq!(config.file_retry.delay_ms, 3_000);
        assert_eq!(config.prefetch_concurrency, 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            content_window = 4

            [file_retry]
            max_attempts = 2
            delay_ms = 10
            priority = "background"
            "#,
        )
        .unwrap();
        assert_eq!(config.content_window, 4);
        assert_eq!(config.file_retry.priority, Priority::Background);
        assert_eq!(config.record_retry, RetryPolicy::record());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = SyncConfig::from_toml_str(
            r#"
            [local_retry]
            max_attempts = 0
            delay_ms = 0
            priority = "utility"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn renders_back_to_toml() {
        let config = SyncConfig::new().with_prefetch_concurrency(5);
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(SyncConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "prefetch_concurrency = 7\n").unwrap();
        assert_eq!(SyncConfig::load(&path).unwrap().prefetch_concurrency, 7);
    }
}
