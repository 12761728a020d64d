use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Lower bound applied to the default fan-out concurrency.
const MIN_DEFAULT_FAN_OUT_CONCURRENCY: usize = 3;

/// Settings of the followed-shows reconciler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Maximum number of per-subject refreshes running at once after a pull.
    ///
    /// When absent, the number of available processing units is used, with a floor of 3.
    #[serde(default)]
    pub fan_out_concurrency: Option<usize>,
    /// Age in milliseconds after which the followed list is considered stale.
    #[serde(default = "default_sync_expiry_ms")]
    pub sync_expiry_ms: u64,
    /// Age in milliseconds after which a single subject is considered stale.
    #[serde(default = "default_subject_expiry_ms")]
    pub subject_expiry_ms: u64,
}

impl SyncConfig {
    /// Default expiry of the followed list: one hour.
    pub const DEFAULT_SYNC_EXPIRY_MS: u64 = 60 * 60 * 1000;

    /// Default expiry of a subject: one day.
    pub const DEFAULT_SUBJECT_EXPIRY_MS: u64 = 24 * 60 * 60 * 1000;

    /// Returns the fan-out concurrency to use, resolving the default when unset.
    pub fn fan_out_concurrency(&self) -> usize {
        self.fan_out_concurrency
            .unwrap_or_else(default_fan_out_concurrency)
    }

    pub fn sync_expiry(&self) -> Duration {
        Duration::from_millis(self.sync_expiry_ms)
    }

    pub fn subject_expiry(&self) -> Duration {
        Duration::from_millis(self.subject_expiry_ms)
    }

    /// Validates the reconciler settings.
    ///
    /// An explicit concurrency must be non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fan_out_concurrency == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "sync.fan_out_concurrency".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fan_out_concurrency: None,
            sync_expiry_ms: default_sync_expiry_ms(),
            subject_expiry_ms: default_subject_expiry_ms(),
        }
    }
}

/// Number of available processing units, never below 3.
pub fn default_fan_out_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(1)
        .max(MIN_DEFAULT_FAN_OUT_CONCURRENCY)
}

fn default_sync_expiry_ms() -> u64 {
    SyncConfig::DEFAULT_SYNC_EXPIRY_MS
}

fn default_subject_expiry_ms() -> u64 {
    SyncConfig::DEFAULT_SUBJECT_EXPIRY_MS
}
