use std::future::Future;

use crate::error::SyncResult;
use crate::types::{EntryId, FollowedEntry, ItemId, ListId, PendingAction};

/// Trait for storing the locally tracked followed entries.
///
/// Implementations must keep at most one entry per [`ItemId`] and handle concurrent access
/// safely, since local mutations and reconciliation passes run concurrently.
pub trait EntryStore {
    /// Returns the entry with the given local identity.
    fn get_entry(
        &self,
        id: EntryId,
    ) -> impl Future<Output = SyncResult<Option<FollowedEntry>>> + Send;

    /// Returns the entry tracking `item_id`, whatever its pending action.
    fn get_entry_for_item(
        &self,
        item_id: ItemId,
    ) -> impl Future<Output = SyncResult<Option<FollowedEntry>>> + Send;

    /// Returns every stored entry, including entries waiting for a remote delete.
    fn get_entries(&self) -> impl Future<Output = SyncResult<Vec<FollowedEntry>>> + Send;

    /// Returns the entries carrying the given pending action.
    fn get_entries_with_action(
        &self,
        action: PendingAction,
    ) -> impl Future<Output = SyncResult<Vec<FollowedEntry>>> + Send;

    /// Inserts the entry when it has no identity yet, otherwise overwrites the stored entry.
    ///
    /// Returns the identity of the stored entry.
    fn save(&self, entry: FollowedEntry) -> impl Future<Output = SyncResult<EntryId>> + Send;

    /// Replaces every entry without a pending action with `entries`.
    ///
    /// Entries with a pending action are kept untouched and win over an incoming entry for the
    /// same item. An incoming entry replacing a stored one for the same item keeps its identity.
    fn replace_all(
        &self,
        entries: Vec<FollowedEntry>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Sets the pending action of the given entries.
    fn update_action(
        &self,
        ids: Vec<EntryId>,
        action: PendingAction,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Purges the given entries.
    fn delete_by_ids(&self, ids: Vec<EntryId>) -> impl Future<Output = SyncResult<()>> + Send;

    /// Returns the cached identity of the remote list, if it was resolved before.
    fn get_cached_list_identity(&self) -> impl Future<Output = SyncResult<Option<ListId>>> + Send;

    /// Caches the identity of the remote list.
    fn set_cached_list_identity(&self, id: ListId) -> impl Future<Output = SyncResult<()>> + Send;
}
