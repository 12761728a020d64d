use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::remote::RemoteSource;
use crate::types::{ListId, RemoteEntry, Subject};

/// Number of calls received by a [`MemoryRemote`], per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCallCounts {
    pub fetch_list_items: u64,
    pub push_items: u64,
    pub remove_items: u64,
    pub resolve_list_id: u64,
}

impl RemoteCallCounts {
    /// Returns the number of calls that mutated the remote list.
    pub fn mutations(&self) -> u64 {
        self.push_items + self.remove_items
    }
}

#[derive(Debug)]
struct Inner {
    list_id: Option<ListId>,
    /// List membership keyed by the remote identity of the subject.
    items: BTreeMap<u64, (RemoteEntry, Subject)>,
    calls: RemoteCallCounts,
}

impl Inner {
    fn check_list(&self, list_id: ListId) -> SyncResult<()> {
        if self.list_id != Some(list_id) {
            bail!(
                ErrorKind::RemoteFailure,
                "The remote list does not exist",
                format!("list {list_id} is unknown to the remote")
            );
        }

        Ok(())
    }
}

/// In-memory remote list for testing and development purposes.
///
/// [`MemoryRemote`] keeps the membership of a single list and counts every call it receives,
/// so tests can assert which remote round trips a reconciliation pass performed.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRemote {
    /// Creates a remote without a list, [`RemoteSource::resolve_list_id`] returns `None`.
    pub fn new() -> Self {
        Self::from_list_id(None)
    }

    /// Creates a remote owning an empty list with the given identity.
    pub fn with_list_id(list_id: ListId) -> Self {
        Self::from_list_id(Some(list_id))
    }

    fn from_list_id(list_id: Option<ListId>) -> Self {
        let inner = Inner {
            list_id,
            items: BTreeMap::new(),
            calls: RemoteCallCounts::default(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Adds a subject to the list without counting a call.
    pub async fn insert_item(&self, subject: Subject, followed_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner
            .items
            .insert(subject.remote_id, (RemoteEntry { followed_at }, subject));
    }

    /// Returns the subjects currently in the list, ordered by remote identity.
    pub async fn items(&self) -> Vec<Subject> {
        let inner = self.inner.lock().await;
        inner
            .items
            .values()
            .map(|(_, subject)| subject.clone())
            .collect()
    }

    /// Returns the number of calls received so far.
    pub async fn call_counts(&self) -> RemoteCallCounts {
        let inner = self.inner.lock().await;
        inner.calls
    }

    /// Resets the call counters, keeping the list membership.
    pub async fn reset_call_counts(&self) {
        let mut inner = self.inner.lock().await;
        inner.calls = RemoteCallCounts::default();
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteSource for MemoryRemote {
    async fn fetch_list_items(&self, list_id: ListId) -> SyncResult<Vec<(RemoteEntry, Subject)>> {
        let mut inner = self.inner.lock().await;
        inner.calls.fetch_list_items += 1;
        inner.check_list(list_id)?;

        Ok(inner.items.values().cloned().collect())
    }

    async fn push_items(&self, list_id: ListId, subjects: Vec<Subject>) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push_items += 1;
        inner.check_list(list_id)?;

        info!(%list_id, count = subjects.len(), "pushing items to the remote list");

        let followed_at = Utc::now();
        for subject in subjects {
            inner
                .items
                .entry(subject.remote_id)
                .or_insert_with(|| (RemoteEntry { followed_at }, subject));
        }

        Ok(())
    }

    async fn remove_items(&self, list_id: ListId, subjects: Vec<Subject>) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.remove_items += 1;
        inner.check_list(list_id)?;

        info!(%list_id, count = subjects.len(), "removing items from the remote list");

        for subject in subjects {
            inner.items.remove(&subject.remote_id);
        }

        Ok(())
    }

    async fn resolve_list_id(&self) -> SyncResult<Option<ListId>> {
        let mut inner = self.inner.lock().await;
        inner.calls.resolve_list_id += 1;

        Ok(inner.list_id)
    }
}
