//! Engine settings
//!
//! Loadable from TOML or YAML; every field has a default so a partial file
//! is enough.

use std::path::Path;

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Longest accepted draft lifetime (100 years)
pub const MAX_DRAFT_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Draft lifetime in seconds; `0` disables expiry
    pub draft_ttl_secs: u64,
    /// Sample size used when the caller does not pass one
    pub default_sample_size: usize,
    /// Proposer calls in flight during generation
    pub generation_concurrency: usize,
    /// Upper bound on resolved scope size for one draft
    pub max_targets_per_draft: usize,
    /// How long an apply waits for items another caller is writing
    pub apply_settle_timeout_ms: u64,
}

impl EngineSettings {
    /// Create default settings
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With draft TTL
    #[inline]
    #[must_use]
    pub fn with_draft_ttl_secs(mut self, secs: u64) -> Self {
        self.draft_ttl_secs = secs;
        self
    }

    /// With default sample size
    #[inline]
    #[must_use]
    pub fn with_default_sample_size(mut self, n: usize) -> Self {
        self.default_sample_size = n;
        self
    }

    /// With generation concurrency
    #[inline]
    #[must_use]
    pub fn with_generation_concurrency(mut self, n: usize) -> Self {
        self.generation_concurrency = n;
        self
    }

    /// With max targets per draft
    #[inline]
    #[must_use]
    pub fn with_max_targets_per_draft(mut self, n: usize) -> Self {
        self.max_targets_per_draft = n;
        self
    }

    /// With apply settle timeout
    #[inline]
    #[must_use]
    pub fn with_apply_settle_timeout_ms(mut self, ms: u64) -> Self {
        self.apply_settle_timeout_ms = ms;
        self
    }

    #[inline]
    #[must_use]
    pub fn apply_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_settle_timeout_ms)
    }

    /// Draft TTL, `None` when expiry is disabled
    #[must_use]
    pub fn draft_ttl(&self) -> Option<TimeDelta> {
        if self.draft_ttl_secs == 0 {
            return None;
        }
        i64::try_from(self.draft_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
    }

    /// Check invariants
    ///
    /// # Errors
    /// Returns [`SettingsError::Invalid`] naming the offending field
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.generation_concurrency == 0 {
            return Err(SettingsError::Invalid {
                field: "generation_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_targets_per_draft == 0 {
            return Err(SettingsError::Invalid {
                field: "max_targets_per_draft",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.draft_ttl_secs > MAX_DRAFT_TTL_SECS {
            return Err(SettingsError::Invalid {
                field: "draft_ttl_secs",
                reason: format!(
                    "{} seconds exceeds the maximum of {MAX_DRAFT_TTL_SECS}",
                    self.draft_ttl_secs
                ),
            });
        }
        Ok(())
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns error if the text is malformed or fails validation
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(text).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse from YAML text
    ///
    /// # Errors
    /// Returns error if the text is malformed or fails validation
    pub fn from_yaml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            serde_yaml::from_str(text).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// Returns error on I/O failure, unknown extension, or invalid content
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            draft_ttl_secs: 7 * 24 * 60 * 60,
            default_sample_size: 5,
            generation_concurrency: 4,
            max_targets_per_draft: 10_000,
            apply_settle_timeout_ms: 30_000,
        }
    }
}
