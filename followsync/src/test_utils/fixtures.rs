use chrono::{DateTime, Utc};
use config::shared::SyncConfig;

use crate::auth::AuthProvider;
use crate::reconcile::FollowedShowsReconciler;
use crate::remote::RemoteSource;
use crate::remote::memory::MemoryRemote;
use crate::store::both::memory::MemoryStore;
use crate::subject::memory::MemorySubjects;
use crate::types::{ItemId, Subject};

/// Returns a configuration with an explicit fan-out concurrency and default expiries.
pub fn sync_config(fan_out_concurrency: usize) -> SyncConfig {
    SyncConfig {
        fan_out_concurrency: Some(fan_out_concurrency),
        ..SyncConfig::default()
    }
}

/// Builds a reconciler over a [`MemoryStore`] and [`MemorySubjects`].
///
/// Panics when the configuration is invalid.
pub fn create_reconciler<R, A>(
    store: &MemoryStore,
    remote: R,
    subjects: &MemorySubjects,
    auth: A,
    fan_out_concurrency: usize,
) -> FollowedShowsReconciler<MemoryStore, R, MemorySubjects, A>
where
    R: RemoteSource + Clone + Send + Sync + 'static,
    A: AuthProvider + Clone + Send + Sync + 'static,
{
    FollowedShowsReconciler::new(
        store.clone(),
        remote,
        subjects.clone(),
        auth,
        sync_config(fan_out_concurrency),
    )
    .unwrap_or_else(|err| panic!("invalid test configuration: {err}"))
}

/// Returns a subject with a title derived from its remote identity.
pub fn test_subject(remote_id: u64) -> Subject {
    Subject::new(remote_id, format!("Show {remote_id}"))
}

/// Stores fully fetched subjects for the given remote identities, returning their items.
pub async fn seed_fetched_subjects(
    subjects: &MemorySubjects,
    remote_ids: impl IntoIterator<Item = u64>,
) -> Vec<ItemId> {
    let mut item_ids = Vec::new();
    for remote_id in remote_ids {
        item_ids.push(subjects.insert_fetched(test_subject(remote_id)).await);
    }

    item_ids
}

/// Adds the subjects with the given remote identities to the remote list.
pub async fn seed_remote_list(
    remote: &MemoryRemote,
    remote_ids: impl IntoIterator<Item = u64>,
    followed_at: DateTime<Utc>,
) {
    for remote_id in remote_ids {
        remote.insert_item(test_subject(remote_id), followed_at).await;
    }
}
