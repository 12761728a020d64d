use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::store::entry::EntryStore;
use crate::store::staleness::StalenessStore;
use crate::types::{EntryId, FollowedEntry, ItemId, ListId, PendingAction, RequestKey};

#[derive(Debug)]
struct Inner {
    /// Followed entries keyed by their local identity.
    entries: BTreeMap<EntryId, FollowedEntry>,
    /// Index from tracked item to the identity of its entry.
    entries_by_item: HashMap<ItemId, EntryId>,
    next_entry_id: u64,
    list_identity: Option<ListId>,
    last_requests: HashMap<RequestKey, DateTime<Utc>>,
}

impl Inner {
    fn allocate_id(&mut self) -> EntryId {
        self.next_entry_id += 1;
        EntryId(self.next_entry_id)
    }

    fn insert(&mut self, id: EntryId, mut entry: FollowedEntry) {
        entry.id = Some(id);
        self.entries_by_item.insert(entry.item_id, id);
        self.entries.insert(id, entry);
        self.next_entry_id = self.next_entry_id.max(id.0);
    }

    fn remove(&mut self, id: EntryId) -> Option<FollowedEntry> {
        let entry = self.entries.remove(&id)?;
        if self.entries_by_item.get(&entry.item_id) == Some(&id) {
            self.entries_by_item.remove(&entry.item_id);
        }

        Some(entry)
    }
}

/// In-memory entry and staleness store.
///
/// [`MemoryStore`] implements both [`EntryStore`] and [`StalenessStore`] and keeps everything in
/// memory, which suits tests, development, and embedding applications that persist elsewhere.
/// All data is lost when the process exits.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Inner {
            entries: BTreeMap::new(),
            entries_by_item: HashMap::new(),
            next_entry_id: 0,
            list_identity: None,
            last_requests: HashMap::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryStore for MemoryStore {
    async fn get_entry(&self, id: EntryId) -> SyncResult<Option<FollowedEntry>> {
        let inner = self.inner.lock().await;

        Ok(inner.entries.get(&id).cloned())
    }

    async fn get_entry_for_item(&self, item_id: ItemId) -> SyncResult<Option<FollowedEntry>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .entries_by_item
            .get(&item_id)
            .and_then(|id| inner.entries.get(id))
            .cloned())
    }

    async fn get_entries(&self) -> SyncResult<Vec<FollowedEntry>> {
        let inner = self.inner.lock().await;

        Ok(inner.entries.values().cloned().collect())
    }

    async fn get_entries_with_action(
        &self,
        action: PendingAction,
    ) -> SyncResult<Vec<FollowedEntry>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .entries
            .values()
            .filter(|entry| entry.pending_action == action)
            .cloned()
            .collect())
    }

    async fn save(&self, entry: FollowedEntry) -> SyncResult<EntryId> {
        let mut inner = self.inner.lock().await;

        if let Some(existing_id) = inner.entries_by_item.get(&entry.item_id).copied() {
            if entry.id != Some(existing_id) {
                bail!(
                    ErrorKind::StoreFailure,
                    "Another entry already tracks this item",
                    format!("item {} is tracked by entry {existing_id}", entry.item_id)
                );
            }
        }

        let id = match entry.id {
            Some(id) => {
                // The entry may have been moved to another item.
                let previous_item = inner.entries.get(&id).map(|previous| previous.item_id);
                if let Some(previous_item) = previous_item.filter(|item| *item != entry.item_id) {
                    inner.entries_by_item.remove(&previous_item);
                }
                id
            }
            None => inner.allocate_id(),
        };
        inner.insert(id, entry);

        Ok(id)
    }

    async fn replace_all(&self, entries: Vec<FollowedEntry>) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        let replaced: Vec<EntryId> = inner
            .entries
            .values()
            .filter(|entry| !entry.pending_action.is_pending())
            .filter_map(|entry| entry.id)
            .collect();

        let mut reusable_ids = HashMap::with_capacity(replaced.len());
        for id in replaced {
            if let Some(entry) = inner.remove(id) {
                reusable_ids.insert(entry.item_id, id);
            }
        }

        for entry in entries {
            // A pending local mutation wins until it was flushed.
            if inner.entries_by_item.contains_key(&entry.item_id) {
                continue;
            }

            let id = match reusable_ids.remove(&entry.item_id) {
                Some(id) => id,
                None => inner.allocate_id(),
            };
            inner.insert(id, entry.with_pending_action(PendingAction::None));
        }

        Ok(())
    }

    async fn update_action(&self, ids: Vec<EntryId>, action: PendingAction) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        for id in ids {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.pending_action = action;
            }
        }

        Ok(())
    }

    async fn delete_by_ids(&self, ids: Vec<EntryId>) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        for id in ids {
            inner.remove(id);
        }

        Ok(())
    }

    async fn get_cached_list_identity(&self) -> SyncResult<Option<ListId>> {
        let inner = self.inner.lock().await;

        Ok(inner.list_identity)
    }

    async fn set_cached_list_identity(&self, id: ListId) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.list_identity = Some(id);

        Ok(())
    }
}

impl StalenessStore for MemoryStore {
    async fn last_attempt(&self, key: RequestKey) -> SyncResult<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;

        Ok(inner.last_requests.get(&key).copied())
    }

    async fn record_attempt(&self, key: RequestKey, at: DateTime<Utc>) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.last_requests.insert(key, at);

        Ok(())
    }
}
