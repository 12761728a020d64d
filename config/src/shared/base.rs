use serde::Deserialize;
use thiserror::Error;

use crate::Config;
use crate::shared::SyncConfig;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}

/// Top level configuration of a process embedding the followed-shows sync core.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FollowSyncConfig {
    /// Reconciliation settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config for FollowSyncConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.sync.validate()
    }
}
