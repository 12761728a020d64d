use std::future::Future;

use crate::error::SyncResult;
use crate::types::{ListId, RemoteEntry, Subject};

/// Trait for the authoritative remote list of followed subjects.
///
/// Every call may fail with [`crate::error::ErrorKind::RemoteFailure`]. The reconciler treats
/// such failures as transient and retries on the next pass, so implementations should make
/// [`RemoteSource::push_items`] and [`RemoteSource::remove_items`] idempotent.
pub trait RemoteSource {
    /// Fetches the full membership of the list.
    fn fetch_list_items(
        &self,
        list_id: ListId,
    ) -> impl Future<Output = SyncResult<Vec<(RemoteEntry, Subject)>>> + Send;

    /// Adds the subjects to the list.
    fn push_items(
        &self,
        list_id: ListId,
        subjects: Vec<Subject>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Removes the subjects from the list.
    fn remove_items(
        &self,
        list_id: ListId,
        subjects: Vec<Subject>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Looks up the identity of the caller's list.
    ///
    /// Returns `None` when the remote system has no list for the caller.
    fn resolve_list_id(&self) -> impl Future<Output = SyncResult<Option<ListId>>> + Send;
}
