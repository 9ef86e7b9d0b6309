//! Harvest run configuration.
//!
//! Every field has a default, so a JSON file only needs the values it
//! changes:
//!
//! ```json
//! { "max_pages": 20, "detail_concurrency": 4, "stall_policy": "abort" }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::harvest::classifier::ClassifierConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What the pipeline does once a page has stalled more than
/// `max_stall_retries` times in a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallPolicy {
    /// Stop the run as if the listing had ended.
    #[default]
    TreatAsEnd,
    /// Fail the run with `PipelineError::NavigationStalled`.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub max_pages: u32,
    pub max_stall_retries: u32,
    /// Base wait before a stall retry; multiplied by the retry number.
    pub stall_backoff_ms: u64,
    pub stall_policy: StallPolicy,
    pub navigation_timeout_secs: u64,
    pub detail_timeout_secs: u64,
    pub classify_timeout_secs: u64,
    /// Retries for transient listing, extraction and detail failures.
    pub fetch_retries: u32,
    pub fetch_backoff_ms: u64,
    /// Concurrent detail fetches. Keep at 1 when details share the
    /// listing's browsing context.
    pub detail_concurrency: usize,
    pub classifier: ClassifierConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_pages: 100,
            max_stall_retries: 3,
            stall_backoff_ms: 3_000,
            stall_policy: StallPolicy::TreatAsEnd,
            navigation_timeout_secs: 60,
            detail_timeout_secs: 60,
            classify_timeout_secs: 10,
            fetch_retries: 2,
            fetch_backoff_ms: 1_000,
            detail_concurrency: 1,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl HarvestConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be at least 1".into()));
        }
        if self.detail_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "detail_concurrency must be at least 1".into(),
            ));
        }
        if self.classifier.lead_paragraphs == 0 {
            return Err(ConfigError::Invalid(
                "classifier.lead_paragraphs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }

    pub fn classify_timeout(&self) -> Duration {
        Duration::from_secs(self.classify_timeout_secs)
    }

    pub fn stall_backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.stall_backoff_ms.saturating_mul(retry as u64))
    }

    pub fn fetch_backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.fetch_backoff_ms.saturating_mul(retry as u64))
    }
}
