use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use config::shared::SyncConfig;
use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::concurrency::fan_out::parallel_for_each_outcomes;
use crate::concurrency::single_flight::{SingleFlight, SingleFlightAction, SingleFlightStats};
use crate::error::{ErrorKind, SyncError, SyncResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{
    RECONCILE_BEFORE_PULL, RECONCILE_BEFORE_PUSH_ADDITIONS, RECONCILE_BEFORE_PUSH_DELETIONS,
    sync_fail_point,
};
use crate::metrics::{
    ERROR_KIND_LABEL, FOLLOWSYNC_PHASE_FAILURES_TOTAL, FOLLOWSYNC_RECONCILIATION_DURATION_SECONDS,
    FOLLOWSYNC_RECONCILIATIONS_TOTAL, OUTCOME_LABEL, PHASE_LABEL,
};
use crate::remote::RemoteSource;
use crate::store::entry::EntryStore;
use crate::store::staleness::StalenessStore;
use crate::subject::SubjectRepository;
use crate::types::{
    EntryId, FlightKey, FollowedEntry, ItemId, ListId, PendingAction, RequestKey, Subject,
    SyncReport,
};
use crate::{bail, sync_error};

/// Phases of a reconciliation pass, used to label logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    ResolveListIdentity,
    PushAdditions,
    PushDeletions,
    Pull,
    RecordAttempt,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::ResolveListIdentity => "resolve_list_identity",
            Phase::PushAdditions => "push_additions",
            Phase::PushDeletions => "push_deletions",
            Phase::Pull => "pull",
            Phase::RecordAttempt => "record_attempt",
        }
    }
}

/// Where the pending mutations of one pass are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Unauthenticated, mutations are settled without the remote system.
    Local,
    Remote(ListId),
    /// Authenticated, but the identity of the remote list could not be resolved.
    Unavailable,
}

/// Keeps the locally tracked followed entries in sync with the authoritative remote list.
///
/// Local mutations ([`FollowedShowsReconciler::follow`], [`FollowedShowsReconciler::unfollow`])
/// only record a pending marker. A pass ([`FollowedShowsReconciler::sync`]) runs strictly
/// ordered phases:
///
/// 1. Resolve the identity of the remote list, from the cache or from the remote system.
/// 2. Push pending additions.
/// 3. Push pending deletions.
/// 4. Pull the authoritative membership, replace the non-pending local entries with it and
///    refresh the pulled subjects under a bounded fan-out.
///
/// The attempt is recorded afterwards regardless of the outcome. Concurrent passes collapse into
/// a single execution whose result is shared by every caller, and per-subject refreshes are
/// deduplicated the same way.
///
/// A failed phase only stops its own progress: pending markers stay in place and are retried on
/// the next pass. The pull is skipped when the remote list is not reachable.
#[derive(Debug, Clone)]
pub struct FollowedShowsReconciler<S, R, J, A> {
    store: S,
    remote: R,
    subjects: J,
    auth: A,
    config: Arc<SyncConfig>,
    /// Serializes local mutations with the marker updates of a pass.
    local_mutations: Arc<Mutex<()>>,
    sync_flights: SingleFlight<FlightKey, SyncReport>,
    identity_flights: SingleFlight<FlightKey, Option<ListId>>,
    refresh_flights: SingleFlightAction<FlightKey>,
    cancel: CancellationToken,
}

impl<S, R, J, A> FollowedShowsReconciler<S, R, J, A>
where
    S: EntryStore + StalenessStore + Clone + Send + Sync + 'static,
    R: RemoteSource + Clone + Send + Sync + 'static,
    J: SubjectRepository + Clone + Send + Sync + 'static,
    A: AuthProvider + Clone + Send + Sync + 'static,
{
    /// Creates a reconciler over the given collaborators.
    ///
    /// Fails with [`ErrorKind::InvalidConfiguration`] when `config` does not validate.
    pub fn new(store: S, remote: R, subjects: J, auth: A, config: SyncConfig) -> SyncResult<Self> {
        config.validate().map_err(|err| {
            sync_error!(
                ErrorKind::InvalidConfiguration,
                "The sync configuration is invalid",
                source: err
            )
        })?;

        let cancel = CancellationToken::new();

        Ok(Self {
            store,
            remote,
            subjects,
            auth,
            config: Arc::new(config),
            local_mutations: Arc::new(Mutex::new(())),
            sync_flights: SingleFlight::new("followed_shows_sync").with_cancellation(&cancel),
            identity_flights: SingleFlight::new("list_identity").with_cancellation(&cancel),
            refresh_flights: SingleFlightAction::new("subject_refresh").with_cancellation(&cancel),
            cancel,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Follows `item_id` locally.
    ///
    /// An untracked item gets a new entry waiting for upload. An entry waiting for a remote
    /// delete is revived for upload, keeping its identity and original follow time. An entry
    /// that is already followed is returned unchanged.
    pub async fn follow(&self, item_id: ItemId) -> SyncResult<FollowedEntry> {
        if self.subjects.get_subject(item_id).await?.is_none() {
            bail!(
                ErrorKind::SubjectNotFound,
                "The subject to follow is not tracked locally",
                format!("no subject is stored under item {item_id}")
            );
        }

        let _guard = self.local_mutations.lock().await;

        let entry = match self.store.get_entry_for_item(item_id).await? {
            Some(entry) if entry.is_active() => return Ok(entry),
            Some(entry) => entry.with_pending_action(PendingAction::Upload),
            None => FollowedEntry::new_upload(item_id, Utc::now()),
        };
        let id = self.store.save(entry.clone()).await?;

        debug!(%item_id, entry_id = %id, "followed item");

        Ok(FollowedEntry {
            id: Some(id),
            ..entry
        })
    }

    /// Unfollows `item_id` locally, marking its entry for a remote delete.
    ///
    /// Returns `None` when the item was not followed.
    pub async fn unfollow(&self, item_id: ItemId) -> SyncResult<Option<FollowedEntry>> {
        let _guard = self.local_mutations.lock().await;

        let Some(entry) = self
            .store
            .get_entry_for_item(item_id)
            .await?
            .filter(FollowedEntry::is_active)
        else {
            return Ok(None);
        };

        let entry = entry.with_pending_action(PendingAction::Delete);
        self.store.save(entry.clone()).await?;

        debug!(%item_id, "unfollowed item");

        Ok(Some(entry))
    }

    pub async fn is_following(&self, item_id: ItemId) -> SyncResult<bool> {
        let entry = self.store.get_entry_for_item(item_id).await?;

        Ok(entry.is_some_and(|entry| entry.is_active()))
    }

    /// Returns the followed entries, oldest follow first.
    pub async fn followed_entries(&self) -> SyncResult<Vec<FollowedEntry>> {
        let mut entries: Vec<FollowedEntry> = self
            .store
            .get_entries()
            .await?
            .into_iter()
            .filter(FollowedEntry::is_active)
            .collect();
        entries.sort_by_key(|entry| entry.followed_at);

        Ok(entries)
    }

    /// Runs a reconciliation pass, or joins the pass already in flight.
    ///
    /// Every caller of one pass observes the same report or the same error. The error
    /// aggregates every failed phase.
    ///
    /// When every caller of a pass stops waiting, the pass still records its attempt but the
    /// subject refreshes it did not finish are cancelled.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        let this = self.clone();
        self.sync_flights
            .run_cancellable(FlightKey::followed_shows_sync(), move |cancel| async move {
                this.reconcile(&cancel).await
            })
            .await
    }

    /// Returns `true` when no pass was attempted within `expiry`.
    pub async fn need_sync(&self, expiry: Duration) -> SyncResult<bool> {
        self.store.is_stale(RequestKey::FollowedShows, expiry).await
    }

    /// Runs a pass when the last attempt is older than `expiry`.
    pub async fn sync_if_stale(&self, expiry: Duration) -> SyncResult<Option<SyncReport>> {
        if !self.need_sync(expiry).await? {
            debug!("followed shows are fresh, skipping reconciliation");
            return Ok(None);
        }

        self.sync().await.map(Some)
    }

    /// Runs a pass when the last attempt is older than the configured expiry.
    pub async fn sync_if_due(&self) -> SyncResult<Option<SyncReport>> {
        self.sync_if_stale(self.config.sync_expiry()).await
    }

    /// Refreshes the metadata and images of one subject.
    ///
    /// Both refreshes are deduplicated per subject with the refreshes of running passes. The
    /// attempt is recorded even when a refresh failed.
    pub async fn refresh_subject(&self, item_id: ItemId) -> SyncResult<()> {
        if self.subjects.get_subject(item_id).await?.is_none() {
            bail!(
                ErrorKind::SubjectNotFound,
                "The subject to refresh is not tracked locally",
                format!("no subject is stored under item {item_id}")
            );
        }

        let (metadata, images) = tokio::join!(
            self.refresh_metadata_once(item_id),
            self.refresh_images_once(item_id)
        );
        self.store
            .record_attempt(RequestKey::Subject(item_id), Utc::now())
            .await?;

        let errors: Vec<SyncError> = [metadata, images]
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    /// Refreshes one subject when its last refresh attempt is older than `expiry`.
    ///
    /// Returns whether a refresh ran.
    pub async fn refresh_subject_if_stale(
        &self,
        item_id: ItemId,
        expiry: Duration,
    ) -> SyncResult<bool> {
        if !self
            .store
            .is_stale(RequestKey::Subject(item_id), expiry)
            .await?
        {
            return Ok(false);
        }

        self.refresh_subject(item_id).await?;

        Ok(true)
    }

    /// Refreshes one subject when its last refresh attempt is older than the configured expiry.
    pub async fn refresh_subject_if_due(&self, item_id: ItemId) -> SyncResult<bool> {
        self.refresh_subject_if_stale(item_id, self.config.subject_expiry())
            .await
    }

    /// Stops the reconciler.
    ///
    /// Refreshes of an in-flight pass that did not start yet are never started and running ones
    /// are cancelled at their next suspension point. New passes fail with
    /// [`ErrorKind::Cancelled`].
    pub fn shutdown(&self) {
        info!("shutting down the followed shows reconciler");
        self.cancel.cancel();
    }

    /// Returns the started/joined counters of the pass coordinator.
    pub fn coordinator_stats(&self) -> SingleFlightStats {
        self.sync_flights.stats()
    }

    async fn reconcile(&self, cancel: &CancellationToken) -> SyncResult<SyncReport> {
        if self.cancel.is_cancelled() {
            bail!(ErrorKind::Cancelled, "The reconciler was shut down");
        }

        let started_at = Instant::now();
        let auth_state = self.auth.auth_state();
        let mut report = SyncReport {
            authenticated: auth_state.is_authenticated(),
            ..SyncReport::default()
        };
        let mut errors = Vec::new();

        info!(
            authenticated = report.authenticated,
            "starting followed shows reconciliation"
        );

        // We decide once where pending mutations go, the auth state is not polled again.
        let target = if auth_state.is_authenticated() {
            match self.resolve_list_identity().await {
                Ok(Some(list_id)) => Target::Remote(list_id),
                Ok(None) => {
                    warn!("the remote system has no followed list for the caller");
                    Target::Unavailable
                }
                Err(err) => {
                    record_phase_failure(Phase::ResolveListIdentity, &err);
                    errors.push(err);
                    Target::Unavailable
                }
            }
        } else {
            Target::Local
        };
        if let Target::Remote(list_id) = target {
            report.list_id = Some(list_id);
        }

        match self.push_additions(target).await {
            Ok(uploaded) => report.uploaded = uploaded,
            Err(err) => {
                record_phase_failure(Phase::PushAdditions, &err);
                errors.push(err);
            }
        }

        match self.push_deletions(target).await {
            Ok(deleted) => report.deleted = deleted,
            Err(err) => {
                record_phase_failure(Phase::PushDeletions, &err);
                errors.push(err);
            }
        }

        if let Target::Remote(list_id) = target {
            match self.pull(list_id, cancel).await {
                Ok((pulled, refreshes_started, refresh_failures)) => {
                    report.pulled = Some(pulled);
                    report.refreshes_started = refreshes_started;
                    report.refresh_failures = refresh_failures;
                }
                Err(err) => {
                    record_phase_failure(Phase::Pull, &err);
                    errors.push(err);
                }
            }
        }

        // The attempt is recorded whatever the outcome, so staleness reflects the latest pass.
        if let Err(err) = self
            .store
            .record_attempt(RequestKey::FollowedShows, Utc::now())
            .await
        {
            record_phase_failure(Phase::RecordAttempt, &err);
            errors.push(err);
        }

        let outcome = if errors.is_empty() {
            "succeeded"
        } else {
            "failed"
        };
        counter!(FOLLOWSYNC_RECONCILIATIONS_TOTAL, OUTCOME_LABEL => outcome).increment(1);
        histogram!(FOLLOWSYNC_RECONCILIATION_DURATION_SECONDS)
            .record(started_at.elapsed().as_secs_f64());

        if !errors.is_empty() {
            warn!(
                failed_phases = errors.len(),
                "followed shows reconciliation finished with errors"
            );
            return Err(errors.into());
        }

        info!(
            uploaded = report.uploaded,
            deleted = report.deleted,
            pulled = ?report.pulled,
            refreshes_started = report.refreshes_started,
            refresh_failures = report.refresh_failures,
            "followed shows reconciliation finished"
        );

        Ok(report)
    }

    /// Returns the cached list identity, resolving it remotely at most once at a time.
    async fn resolve_list_identity(&self) -> SyncResult<Option<ListId>> {
        if let Some(list_id) = self.store.get_cached_list_identity().await? {
            return Ok(Some(list_id));
        }

        let store = self.store.clone();
        let remote = self.remote.clone();
        self.identity_flights
            .run(FlightKey::list_identity(), move || async move {
                let list_id = remote.resolve_list_id().await?;
                if let Some(list_id) = list_id {
                    store.set_cached_list_identity(list_id).await?;
                    info!(%list_id, "resolved remote list identity");
                }

                Ok::<_, SyncError>(list_id)
            })
            .await
    }

    async fn push_additions(&self, target: Target) -> SyncResult<usize> {
        let pending = self
            .store
            .get_entries_with_action(PendingAction::Upload)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        #[cfg(feature = "failpoints")]
        sync_fail_point(RECONCILE_BEFORE_PUSH_ADDITIONS)?;

        match target {
            Target::Local => {
                debug!(count = pending.len(), "settling pending additions locally");
            }
            Target::Remote(list_id) => {
                let subjects = self.subjects_of(&pending).await?;
                self.remote.push_items(list_id, subjects).await?;
                info!(%list_id, count = pending.len(), "pushed pending additions");
            }
            Target::Unavailable => {
                bail!(
                    ErrorKind::RemoteFailure,
                    "Pending additions could not be pushed",
                    format!(
                        "the remote list is unavailable, {} additions stay pending",
                        pending.len()
                    )
                );
            }
        }

        let _guard = self.local_mutations.lock().await;
        let flushed = self
            .entries_still_pending(&pending, PendingAction::Upload)
            .await?;
        let uploaded = flushed.len();
        self.store
            .update_action(flushed, PendingAction::None)
            .await?;

        Ok(uploaded)
    }

    async fn push_deletions(&self, target: Target) -> SyncResult<usize> {
        let pending = self
            .store
            .get_entries_with_action(PendingAction::Delete)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        #[cfg(feature = "failpoints")]
        sync_fail_point(RECONCILE_BEFORE_PUSH_DELETIONS)?;

        match target {
            Target::Local => {
                debug!(count = pending.len(), "settling pending deletions locally");
            }
            Target::Remote(list_id) => {
                let subjects = self.subjects_of(&pending).await?;
                self.remote.remove_items(list_id, subjects).await?;
                info!(%list_id, count = pending.len(), "pushed pending deletions");
            }
            Target::Unavailable => {
                bail!(
                    ErrorKind::RemoteFailure,
                    "Pending deletions could not be pushed",
                    format!(
                        "the remote list is unavailable, {} deletions stay pending",
                        pending.len()
                    )
                );
            }
        }

        let _guard = self.local_mutations.lock().await;
        let purged = self
            .entries_still_pending(&pending, PendingAction::Delete)
            .await?;
        let deleted = purged.len();
        self.store.delete_by_ids(purged).await?;

        Ok(deleted)
    }

    /// Replaces the non-pending entries with the remote membership and refreshes the pulled
    /// subjects.
    ///
    /// Returns the number of pulled entries, of subjects whose refresh started and of subjects
    /// whose refresh failed.
    async fn pull(
        &self,
        list_id: ListId,
        cancel: &CancellationToken,
    ) -> SyncResult<(usize, usize, usize)> {
        #[cfg(feature = "failpoints")]
        sync_fail_point(RECONCILE_BEFORE_PULL)?;

        let remote_items = self.remote.fetch_list_items(list_id).await?;

        let mut seen = HashSet::with_capacity(remote_items.len());
        let mut entries = Vec::with_capacity(remote_items.len());
        for (remote_entry, subject) in remote_items {
            let item_id = self.subjects.resolve_or_create_placeholder(subject).await?;
            if !seen.insert(item_id) {
                continue;
            }

            entries.push(FollowedEntry {
                id: None,
                item_id,
                followed_at: remote_entry.followed_at,
                pending_action: PendingAction::None,
            });
        }
        let item_ids: Vec<ItemId> = entries.iter().map(|entry| entry.item_id).collect();

        // The local state is only replaced once the whole membership was fetched and resolved.
        {
            let _guard = self.local_mutations.lock().await;
            self.store.replace_all(entries).await?;
        }

        info!(%list_id, count = item_ids.len(), "replaced followed entries with the remote list");

        let pulled = item_ids.len();
        let (refreshes_started, refresh_failures) = self
            .refresh_pulled_subjects(item_ids, cancel)
            .await?;

        Ok((pulled, refreshes_started, refresh_failures))
    }

    /// Refreshes every subject whose metadata or images were never fetched.
    ///
    /// Failures are isolated per subject, logged and counted.
    async fn refresh_pulled_subjects(
        &self,
        item_ids: Vec<ItemId>,
        cancel: &CancellationToken,
    ) -> SyncResult<(usize, usize)> {
        let started = Arc::new(AtomicUsize::new(0));

        let outcomes = parallel_for_each_outcomes(
            item_ids.iter().copied(),
            self.config.fan_out_concurrency(),
            cancel,
            |item_id| {
                let this = self.clone();
                let started = started.clone();
                async move { this.refresh_if_never_fetched(item_id, &started).await }
            },
        )
        .await?;

        for (item_id, outcome) in item_ids.iter().zip(outcomes.outcomes()) {
            if let Err(err) = outcome {
                warn!(%item_id, error = %err, "subject refresh failed");
            }
        }

        Ok((started.load(Ordering::Relaxed), outcomes.failed()))
    }

    async fn refresh_if_never_fetched(
        &self,
        item_id: ItemId,
        started: &AtomicUsize,
    ) -> SyncResult<()> {
        let needs_metadata = self.subjects.needs_metadata_refresh(item_id).await?;
        let needs_images = self.subjects.needs_image_refresh(item_id).await?;
        if !needs_metadata && !needs_images {
            return Ok(());
        }

        started.fetch_add(1, Ordering::Relaxed);

        let mut errors = Vec::new();
        if needs_metadata {
            if let Err(err) = self.refresh_metadata_once(item_id).await {
                errors.push(err);
            }
        }
        if needs_images {
            if let Err(err) = self.refresh_images_once(item_id).await {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    async fn refresh_metadata_once(&self, item_id: ItemId) -> SyncResult<()> {
        let subjects = self.subjects.clone();
        self.refresh_flights
            .run_cancellable(FlightKey::subject_metadata(item_id), move |cancel| async move {
                until_cancelled(&cancel, subjects.refresh_metadata(item_id)).await
            })
            .await
    }

    async fn refresh_images_once(&self, item_id: ItemId) -> SyncResult<()> {
        let subjects = self.subjects.clone();
        self.refresh_flights
            .run_cancellable(FlightKey::subject_images(item_id), move |cancel| async move {
                until_cancelled(&cancel, subjects.refresh_images(item_id)).await
            })
            .await
    }

    /// Returns the subjects referenced by `entries`, in order.
    async fn subjects_of(&self, entries: &[FollowedEntry]) -> SyncResult<Vec<Subject>> {
        let mut subjects = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(subject) = self.subjects.get_subject(entry.item_id).await? else {
                bail!(
                    ErrorKind::SubjectNotFound,
                    "A pending entry references an unknown subject",
                    format!("entry {:?} references item {}", entry.id, entry.item_id)
                );
            };
            subjects.push(subject);
        }

        Ok(subjects)
    }

    /// Returns the identities of `pending` entries that still carry `action`.
    ///
    /// Entries mutated locally while their marker was being flushed keep the new marker.
    async fn entries_still_pending(
        &self,
        pending: &[FollowedEntry],
        action: PendingAction,
    ) -> SyncResult<Vec<EntryId>> {
        let current: HashSet<EntryId> = self
            .store
            .get_entries_with_action(action)
            .await?
            .into_iter()
            .filter_map(|entry| entry.id)
            .collect();

        Ok(pending
            .iter()
            .filter_map(|entry| entry.id)
            .filter(|id| current.contains(id))
            .collect())
    }
}

/// Runs `refresh` unless `cancel` fires first.
async fn until_cancelled(
    cancel: &CancellationToken,
    refresh: impl Future<Output = SyncResult<()>>,
) -> SyncResult<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(sync_error!(
            ErrorKind::Cancelled,
            "The subject refresh was cancelled"
        )),
        result = refresh => result,
    }
}

fn record_phase_failure(phase: Phase, err: &SyncError) {
    warn!(phase = phase.as_str(), error = %err, "reconciliation phase failed");
    counter!(
        FOLLOWSYNC_PHASE_FAILURES_TOTAL,
        PHASE_LABEL => phase.as_str(),
        ERROR_KIND_LABEL => format!("{:?}", err.kind())
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::auth::create_auth_channel;
    use crate::remote::memory::MemoryRemote;
    use crate::store::both::memory::MemoryStore;
    use crate::subject::memory::MemorySubjects;
    use crate::types::AuthState;

    type TestReconciler<A> = FollowedShowsReconciler<MemoryStore, MemoryRemote, MemorySubjects, A>;

    fn sync_config(concurrency: usize) -> SyncConfig {
        SyncConfig {
            fan_out_concurrency: Some(concurrency),
            ..SyncConfig::default()
        }
    }

    fn reconciler<A>(
        store: &MemoryStore,
        remote: &MemoryRemote,
        subjects: &MemorySubjects,
        auth: A,
    ) -> TestReconciler<A>
    where
        A: AuthProvider + Clone + Send + Sync + 'static,
    {
        FollowedShowsReconciler::new(
            store.clone(),
            remote.clone(),
            subjects.clone(),
            auth,
            sync_config(3),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_pass_settles_pending_additions_locally() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::with_list_id(ListId(7));
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_fetched(Subject::new(42, "Dark")).await;
        let entry_id = store
            .save(FollowedEntry::new_upload(item_id, Utc::now()))
            .await
            .unwrap();

        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Unauthenticated);
        let report = reconciler.sync().await.unwrap();

        let entry = store.get_entry(entry_id).await.unwrap().unwrap();
        assert_eq!(entry.pending_action, PendingAction::None);
        assert_eq!(report.uploaded, 1);
        assert!(!report.authenticated);
        assert_eq!(report.pulled, None);
        assert_eq!(remote.call_counts().await, Default::default());
    }

    #[tokio::test]
    async fn unauthenticated_pass_purges_pending_deletions() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_fetched(Subject::new(42, "Dark")).await;
        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Unauthenticated);

        reconciler.follow(item_id).await.unwrap();
        reconciler.sync().await.unwrap();
        reconciler.unfollow(item_id).await.unwrap();
        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(store.get_entries().await.unwrap().is_empty());
        assert_eq!(remote.call_counts().await, Default::default());
    }

    #[tokio::test]
    async fn authenticated_push_clears_the_marker() {
        let store = MemoryStore::new();
        store.set_cached_list_identity(ListId(7)).await.unwrap();
        let remote = MemoryRemote::with_list_id(ListId(7));
        let subjects = MemorySubjects::new();
        let subject = Subject::new(42, "Dark");
        let item_id = subjects.insert_fetched(subject.clone()).await;
        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Authenticated);

        let followed = reconciler.follow(item_id).await.unwrap();
        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.list_id, Some(ListId(7)));
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.pulled, Some(1));
        assert_eq!(remote.items().await, vec![subject]);

        let entry = store.get_entry_for_item(item_id).await.unwrap().unwrap();
        assert_eq!(entry.id, followed.id);
        assert_eq!(entry.pending_action, PendingAction::None);

        let calls = remote.call_counts().await;
        assert_eq!(calls.push_items, 1);
        assert_eq!(calls.resolve_list_id, 0);
    }

    #[tokio::test]
    async fn failed_push_keeps_the_marker_and_records_the_attempt() {
        let store = MemoryStore::new();
        // The cached identity no longer exists remotely, so every list call fails.
        store.set_cached_list_identity(ListId(7)).await.unwrap();
        let remote = MemoryRemote::with_list_id(ListId(8));
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_fetched(Subject::new(42, "Dark")).await;
        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Authenticated);
        reconciler.follow(item_id).await.unwrap();

        let err = reconciler.sync().await.unwrap_err();

        assert!(err.contains_kind(ErrorKind::RemoteFailure));
        let entry = store.get_entry_for_item(item_id).await.unwrap().unwrap();
        assert_eq!(entry.pending_action, PendingAction::Upload);
        assert!(
            !reconciler
                .need_sync(Duration::from_secs(3600))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn missing_remote_list_keeps_markers_and_skips_the_pull() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_fetched(Subject::new(42, "Dark")).await;
        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Authenticated);
        reconciler.follow(item_id).await.unwrap();

        let err = reconciler.sync().await.unwrap_err();

        assert_eq!(err.kinds(), vec![ErrorKind::RemoteFailure]);
        let entry = store.get_entry_for_item(item_id).await.unwrap().unwrap();
        assert_eq!(entry.pending_action, PendingAction::Upload);
        let calls = remote.call_counts().await;
        assert_eq!(calls.resolve_list_id, 1);
        assert_eq!(calls.fetch_list_items, 0);
    }

    #[tokio::test]
    async fn list_identity_is_resolved_once_and_cached() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::with_list_id(ListId(7));
        let subjects = MemorySubjects::new();
        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Authenticated);

        reconciler.sync().await.unwrap();
        reconciler.sync().await.unwrap();

        assert_eq!(
            store.get_cached_list_identity().await.unwrap(),
            Some(ListId(7))
        );
        assert_eq!(remote.call_counts().await.resolve_list_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pull_creates_placeholders_and_bounds_refreshes() {
        let store = MemoryStore::new();
        store.set_cached_list_identity(ListId(7)).await.unwrap();
        let remote = MemoryRemote::with_list_id(ListId(7));
        let subjects = MemorySubjects::new().with_refresh_delay(Duration::from_millis(10));

        let known = Subject::new(1, "Dark");
        let known_id = subjects.insert_fetched(known.clone()).await;
        remote.insert_item(known, Utc::now()).await;
        for remote_id in 2..=9 {
            remote
                .insert_item(Subject::new(remote_id, format!("Show {remote_id}")), Utc::now())
                .await;
        }

        let reconciler = FollowedShowsReconciler::new(
            store.clone(),
            remote.clone(),
            subjects.clone(),
            AuthState::Authenticated,
            sync_config(2),
        )
        .unwrap();
        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.pulled, Some(9));
        assert_eq!(report.refreshes_started, 8);
        assert_eq!(report.refresh_failures, 0);

        let placeholder_id = subjects.item_for_remote_id(2).await.unwrap();
        assert_ne!(placeholder_id, known_id);
        assert_eq!(subjects.metadata_refreshes(placeholder_id).await, 1);
        assert_eq!(subjects.image_refreshes(placeholder_id).await, 1);
        assert_eq!(subjects.metadata_refreshes(known_id).await, 0);
        assert_eq!(subjects.image_refreshes(known_id).await, 0);
        assert!(subjects.max_active_refreshes().await <= 2);

        assert!(reconciler.is_following(placeholder_id).await.unwrap());
        assert_eq!(reconciler.followed_entries().await.unwrap().len(), 9);
    }

    #[tokio::test]
    async fn failed_refreshes_are_counted_not_returned() {
        let store = MemoryStore::new();
        store.set_cached_list_identity(ListId(7)).await.unwrap();
        let remote = MemoryRemote::with_list_id(ListId(7));
        remote.insert_item(Subject::new(1, "Dark"), Utc::now()).await;
        remote.insert_item(Subject::new(2, "Andor"), Utc::now()).await;
        let subjects = MemorySubjects::new();
        let failing = subjects.insert_placeholder(Subject::new(2, "Andor")).await;
        subjects.fail_refreshes_for(failing).await;
        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Authenticated);

        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.refreshes_started, 2);
        assert_eq!(report.refresh_failures, 1);
        assert!(subjects.needs_metadata_refresh(failing).await.unwrap());
    }

    #[tokio::test]
    async fn second_pass_without_mutations_only_pulls() {
        let store = MemoryStore::new();
        store.set_cached_list_identity(ListId(7)).await.unwrap();
        let remote = MemoryRemote::with_list_id(ListId(7));
        remote.insert_item(Subject::new(1, "Dark"), Utc::now()).await;
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_fetched(Subject::new(2, "Andor")).await;
        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Authenticated);
        reconciler.follow(item_id).await.unwrap();

        reconciler.sync().await.unwrap();
        let entries = store.get_entries().await.unwrap();
        remote.reset_call_counts().await;
        let refreshes = subjects.total_refreshes().await;

        let report = reconciler.sync().await.unwrap();

        assert_eq!(report.uploaded, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.refreshes_started, 0);
        let calls = remote.call_counts().await;
        assert_eq!(calls.fetch_list_items, 1);
        assert_eq!(calls.mutations(), 0);
        assert_eq!(calls.resolve_list_id, 0);
        assert_eq!(store.get_entries().await.unwrap(), entries);
        assert_eq!(subjects.total_refreshes().await, refreshes);
    }

    #[tokio::test]
    async fn refollowing_a_pending_delete_restores_the_upload() {
        let store = MemoryStore::new();
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_fetched(Subject::new(42, "Dark")).await;
        let followed_at = Utc::now() - ChronoDuration::days(3);
        let entry_id = store
            .save(
                FollowedEntry::new_upload(item_id, followed_at)
                    .with_pending_action(PendingAction::None),
            )
            .await
            .unwrap();
        let reconciler = reconciler(
            &store,
            &MemoryRemote::new(),
            &subjects,
            AuthState::Unauthenticated,
        );

        let unfollowed = reconciler.unfollow(item_id).await.unwrap().unwrap();
        assert_eq!(unfollowed.pending_action, PendingAction::Delete);
        assert!(!reconciler.is_following(item_id).await.unwrap());

        let refollowed = reconciler.follow(item_id).await.unwrap();

        assert_eq!(refollowed.id, Some(entry_id));
        assert_eq!(refollowed.followed_at, followed_at);
        assert_eq!(refollowed.pending_action, PendingAction::Upload);
        assert_eq!(store.get_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn follow_is_idempotent_and_unfollow_of_untracked_is_a_no_op() {
        let store = MemoryStore::new();
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_fetched(Subject::new(42, "Dark")).await;
        let reconciler = reconciler(
            &store,
            &MemoryRemote::new(),
            &subjects,
            AuthState::Unauthenticated,
        );

        let first = reconciler.follow(item_id).await.unwrap();
        let second = reconciler.follow(item_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(reconciler.unfollow(ItemId(999)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_subjects_are_rejected() {
        let reconciler = reconciler(
            &MemoryStore::new(),
            &MemoryRemote::new(),
            &MemorySubjects::new(),
            AuthState::Unauthenticated,
        );

        let err = reconciler.follow(ItemId(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubjectNotFound);

        let err = reconciler.refresh_subject(ItemId(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubjectNotFound);
    }

    #[tokio::test]
    async fn followed_entries_are_ordered_by_follow_time() {
        let store = MemoryStore::new();
        let subjects = MemorySubjects::new();
        let older = subjects.insert_fetched(Subject::new(1, "Dark")).await;
        let newer = subjects.insert_fetched(Subject::new(2, "Andor")).await;
        let removed = subjects.insert_fetched(Subject::new(3, "Lost")).await;
        let now = Utc::now();
        store
            .save(FollowedEntry::new_upload(newer, now))
            .await
            .unwrap();
        store
            .save(FollowedEntry::new_upload(older, now - ChronoDuration::hours(1)))
            .await
            .unwrap();
        store
            .save(
                FollowedEntry::new_upload(removed, now - ChronoDuration::hours(2))
                    .with_pending_action(PendingAction::Delete),
            )
            .await
            .unwrap();
        let reconciler = reconciler(
            &store,
            &MemoryRemote::new(),
            &subjects,
            AuthState::Unauthenticated,
        );

        let items: Vec<ItemId> = reconciler
            .followed_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.item_id)
            .collect();

        assert_eq!(items, vec![older, newer]);
    }

    #[tokio::test]
    async fn concurrent_syncs_collapse_into_one_pass() {
        let store = MemoryStore::new();
        store.set_cached_list_identity(ListId(7)).await.unwrap();
        let remote = MemoryRemote::with_list_id(ListId(7));
        remote.insert_item(Subject::new(1, "Dark"), Utc::now()).await;
        let subjects = MemorySubjects::new();
        let reconciler = reconciler(&store, &remote, &subjects, AuthState::Authenticated);

        let (first, second) = tokio::join!(reconciler.sync(), reconciler.sync());

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(remote.call_counts().await.fetch_list_items, 1);
        let stats = reconciler.coordinator_stats();
        assert_eq!(stats.started, 1);
        assert_eq!(stats.joined, 1);
    }

    #[tokio::test]
    async fn auth_changes_apply_to_the_next_pass() {
        let store = MemoryStore::new();
        store.set_cached_list_identity(ListId(7)).await.unwrap();
        let remote = MemoryRemote::with_list_id(ListId(7));
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_fetched(Subject::new(42, "Dark")).await;
        let (auth_tx, auth) = create_auth_channel(AuthState::Unauthenticated);
        let reconciler = reconciler(&store, &remote, &subjects, auth);

        reconciler.sync().await.unwrap();
        assert_eq!(remote.call_counts().await, Default::default());

        auth_tx.log_in();
        reconciler.follow(item_id).await.unwrap();
        let report = reconciler.sync().await.unwrap();

        assert!(report.authenticated);
        assert_eq!(remote.call_counts().await.push_items, 1);
    }

    #[tokio::test]
    async fn staleness_gates_passes_and_subject_refreshes() {
        let store = MemoryStore::new();
        let subjects = MemorySubjects::new();
        let item_id = subjects.insert_placeholder(Subject::new(42, "Dark")).await;
        let reconciler = reconciler(
            &store,
            &MemoryRemote::new(),
            &subjects,
            AuthState::Unauthenticated,
        );
        let expiry = Duration::from_secs(3600);

        assert!(reconciler.sync_if_stale(expiry).await.unwrap().is_some());
        assert!(reconciler.sync_if_stale(expiry).await.unwrap().is_none());
        assert!(reconciler.sync_if_due().await.unwrap().is_none());

        assert!(
            reconciler
                .refresh_subject_if_stale(item_id, expiry)
                .await
                .unwrap()
        );
        assert!(!reconciler.refresh_subject_if_due(item_id).await.unwrap());
        assert_eq!(subjects.metadata_refreshes(item_id).await, 1);
        assert_eq!(subjects.image_refreshes(item_id).await, 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_passes() {
        let reconciler = reconciler(
            &MemoryStore::new(),
            &MemoryRemote::new(),
            &MemorySubjects::new(),
            AuthState::Unauthenticated,
        );

        reconciler.shutdown();
        let err = reconciler.sync().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = FollowedShowsReconciler::new(
            MemoryStore::new(),
            MemoryRemote::new(),
            MemorySubjects::new(),
            AuthState::Unauthenticated,
            sync_config(0),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }
}
