use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::subject::SubjectRepository;
use crate::types::{ItemId, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshKind {
    Metadata,
    Images,
}

#[derive(Debug)]
struct SubjectRecord {
    subject: Subject,
    metadata_fetched: bool,
    images_fetched: bool,
}

#[derive(Debug, Default)]
struct RefreshCounts {
    metadata: u64,
    images: u64,
}

#[derive(Debug, Default)]
struct Inner {
    subjects: BTreeMap<ItemId, SubjectRecord>,
    by_remote_id: HashMap<u64, ItemId>,
    next_item_id: u64,
    refreshes: HashMap<ItemId, RefreshCounts>,
    failing_items: HashSet<ItemId>,
    active_refreshes: usize,
    max_active_refreshes: usize,
}

impl Inner {
    fn insert(&mut self, subject: Subject, fetched: bool) -> ItemId {
        if let Some(item_id) = self.by_remote_id.get(&subject.remote_id) {
            return *item_id;
        }

        self.next_item_id += 1;
        let item_id = ItemId(self.next_item_id);
        self.by_remote_id.insert(subject.remote_id, item_id);
        self.subjects.insert(
            item_id,
            SubjectRecord {
                subject,
                metadata_fetched: fetched,
                images_fetched: fetched,
            },
        );

        item_id
    }

    fn record(&self, item_id: ItemId) -> SyncResult<&SubjectRecord> {
        match self.subjects.get(&item_id) {
            Some(record) => Ok(record),
            None => bail!(
                ErrorKind::SubjectNotFound,
                "The subject is not tracked locally",
                format!("no subject is stored under item {item_id}")
            ),
        }
    }
}

/// In-memory subject registry for testing and development purposes.
///
/// Subjects are created either as placeholders, whose metadata and images still have to be
/// fetched, or as fully fetched records. Refreshes mark the data as fetched and are counted per
/// item. An optional refresh delay keeps refreshes running long enough for tests to observe how
/// many of them overlap.
#[derive(Debug, Clone)]
pub struct MemorySubjects {
    inner: Arc<Mutex<Inner>>,
    refresh_delay: Option<Duration>,
}

impl MemorySubjects {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            refresh_delay: None,
        }
    }

    /// Makes every refresh sleep for `delay` before it completes.
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    /// Stores a subject whose metadata and images are already fetched.
    pub async fn insert_fetched(&self, subject: Subject) -> ItemId {
        let mut inner = self.inner.lock().await;
        inner.insert(subject, true)
    }

    /// Stores a placeholder subject that still needs both refreshes.
    pub async fn insert_placeholder(&self, subject: Subject) -> ItemId {
        let mut inner = self.inner.lock().await;
        inner.insert(subject, false)
    }

    /// Makes every refresh of `item_id` fail with a remote failure.
    pub async fn fail_refreshes_for(&self, item_id: ItemId) {
        let mut inner = self.inner.lock().await;
        inner.failing_items.insert(item_id);
    }

    /// Returns the item stored for the given remote identity.
    pub async fn item_for_remote_id(&self, remote_id: u64) -> Option<ItemId> {
        let inner = self.inner.lock().await;
        inner.by_remote_id.get(&remote_id).copied()
    }

    /// Returns the number of completed metadata refreshes of `item_id`.
    pub async fn metadata_refreshes(&self, item_id: ItemId) -> u64 {
        let inner = self.inner.lock().await;
        inner
            .refreshes
            .get(&item_id)
            .map_or(0, |counts| counts.metadata)
    }

    /// Returns the number of completed image refreshes of `item_id`.
    pub async fn image_refreshes(&self, item_id: ItemId) -> u64 {
        let inner = self.inner.lock().await;
        inner.refreshes.get(&item_id).map_or(0, |counts| counts.images)
    }

    /// Returns the number of completed refreshes across all items.
    pub async fn total_refreshes(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner
            .refreshes
            .values()
            .map(|counts| counts.metadata + counts.images)
            .sum()
    }

    /// Returns the highest number of refreshes that were running at the same time.
    pub async fn max_active_refreshes(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.max_active_refreshes
    }

    async fn refresh(&self, item_id: ItemId, kind: RefreshKind) -> SyncResult<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.record(item_id)?;
            inner.active_refreshes += 1;
            inner.max_active_refreshes = inner.max_active_refreshes.max(inner.active_refreshes);
        }

        if let Some(delay) = self.refresh_delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        inner.active_refreshes -= 1;

        if inner.failing_items.contains(&item_id) {
            bail!(
                ErrorKind::RemoteFailure,
                "The subject refresh failed",
                format!("refreshing item {item_id} failed")
            );
        }

        debug!(%item_id, ?kind, "subject refreshed");

        let counts = inner.refreshes.entry(item_id).or_default();
        match kind {
            RefreshKind::Metadata => counts.metadata += 1,
            RefreshKind::Images => counts.images += 1,
        }
        if let Some(record) = inner.subjects.get_mut(&item_id) {
            match kind {
                RefreshKind::Metadata => record.metadata_fetched = true,
                RefreshKind::Images => record.images_fetched = true,
            }
        }

        Ok(())
    }
}

impl Default for MemorySubjects {
    fn default() -> Self {
        Self::new()
    }
}

impl SubjectRepository for MemorySubjects {
    async fn resolve_or_create_placeholder(&self, subject: Subject) -> SyncResult<ItemId> {
        let mut inner = self.inner.lock().await;

        Ok(inner.insert(subject, false))
    }

    async fn get_subject(&self, item_id: ItemId) -> SyncResult<Option<Subject>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .subjects
            .get(&item_id)
            .map(|record| record.subject.clone()))
    }

    async fn needs_metadata_refresh(&self, item_id: ItemId) -> SyncResult<bool> {
        let inner = self.inner.lock().await;

        Ok(!inner.record(item_id)?.metadata_fetched)
    }

    async fn refresh_metadata(&self, item_id: ItemId) -> SyncResult<()> {
        self.refresh(item_id, RefreshKind::Metadata).await
    }

    async fn needs_image_refresh(&self, item_id: ItemId) -> SyncResult<bool> {
        let inner = self.inner.lock().await;

        Ok(!inner.record(item_id)?.images_fetched)
    }

    async fn refresh_images(&self, item_id: ItemId) -> SyncResult<()> {
        self.refresh(item_id, RefreshKind::Images).await
    }
}
