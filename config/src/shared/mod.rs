//! Shared configuration types.

mod base;
mod sync;

pub use base::{FollowSyncConfig, ValidationError};
pub use sync::{SyncConfig, default_fan_out_concurrency};
