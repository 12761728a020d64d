use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::types::RequestKey;

/// Trait for the last-request records deciding whether a resource needs to be synced again.
pub trait StalenessStore: Sync {
    /// Returns the time of the last recorded attempt for `key`.
    fn last_attempt(
        &self,
        key: RequestKey,
    ) -> impl Future<Output = SyncResult<Option<DateTime<Utc>>>> + Send;

    /// Records an attempt for `key` at `at`, replacing the previous record.
    fn record_attempt(
        &self,
        key: RequestKey,
        at: DateTime<Utc>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns `true` when no attempt was recorded for `key` or the last one is older than
    /// `expiry`.
    fn is_stale(
        &self,
        key: RequestKey,
        expiry: Duration,
    ) -> impl Future<Output = SyncResult<bool>> + Send {
        async move {
            let Some(last_attempt) = self.last_attempt(key).await? else {
                return Ok(true);
            };

            // An attempt recorded in the future (clock skew) is treated as fresh.
            Ok((Utc::now() - last_attempt)
                .to_std()
                .is_ok_and(|age| age >= expiry))
        }
    }
}
