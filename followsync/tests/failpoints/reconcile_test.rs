use chrono::Utc;
use followsync::error::ErrorKind;
use followsync::failpoints::{
    RECONCILE_BEFORE_PULL, RECONCILE_BEFORE_PUSH_ADDITIONS, RECONCILE_BEFORE_PUSH_DELETIONS,
};
use followsync::remote::memory::MemoryRemote;
use followsync::store::both::memory::MemoryStore;
use followsync::store::entry::EntryStore;
use followsync::subject::memory::MemorySubjects;
use followsync::test_utils::failpoints::SyncFailScenario;
use followsync::test_utils::fixtures::{
    create_reconciler, seed_fetched_subjects, seed_remote_list, test_subject,
};
use followsync::types::{AuthState, ListId, PendingAction};
use telemetry::init_test_tracing;

async fn store_with_list(list_id: ListId) -> MemoryStore {
    let store = MemoryStore::new();
    store.set_cached_list_identity(list_id).await.unwrap();
    store
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_push_additions_keeps_the_upload_marker() {
    init_test_tracing();
    let scenario = SyncFailScenario::setup(&[(RECONCILE_BEFORE_PUSH_ADDITIONS, "return")]);

    let store = store_with_list(ListId(7)).await;
    let remote = MemoryRemote::with_list_id(ListId(7));
    let subjects = MemorySubjects::new();
    let item_ids = seed_fetched_subjects(&subjects, [1]).await;
    let reconciler = create_reconciler(
        &store,
        remote.clone(),
        &subjects,
        AuthState::Authenticated,
        2,
    );
    reconciler.follow(item_ids[0]).await.unwrap();

    let err = reconciler.sync().await.unwrap_err();

    assert_eq!(err.kinds(), vec![ErrorKind::RemoteFailure]);
    let entry = store.get_entry_for_item(item_ids[0]).await.unwrap().unwrap();
    assert_eq!(entry.pending_action, PendingAction::Upload);
    let calls = remote.call_counts().await;
    assert_eq!(calls.push_items, 0);
    assert_eq!(calls.fetch_list_items, 1);

    scenario.disable(RECONCILE_BEFORE_PUSH_ADDITIONS);
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(remote.items().await, vec![test_subject(1)]);

    scenario.teardown();
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_push_deletions_keeps_the_delete_marker() {
    init_test_tracing();
    let scenario = SyncFailScenario::setup(&[(RECONCILE_BEFORE_PUSH_DELETIONS, "return")]);

    let store = store_with_list(ListId(7)).await;
    let remote = MemoryRemote::with_list_id(ListId(7));
    seed_remote_list(&remote, [1], Utc::now()).await;
    let subjects = MemorySubjects::new();
    let item_ids = seed_fetched_subjects(&subjects, [1]).await;
    let reconciler = create_reconciler(
        &store,
        remote.clone(),
        &subjects,
        AuthState::Authenticated,
        2,
    );
    reconciler.sync().await.unwrap();
    reconciler.unfollow(item_ids[0]).await.unwrap().unwrap();

    let err = reconciler.sync().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteFailure);
    // The pull brought the item back, but the pending delete wins locally.
    let entry = store.get_entry_for_item(item_ids[0]).await.unwrap().unwrap();
    assert_eq!(entry.pending_action, PendingAction::Delete);
    assert!(!reconciler.is_following(item_ids[0]).await.unwrap());
    assert_eq!(remote.items().await, vec![test_subject(1)]);

    scenario.teardown();
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.deleted, 1);
    assert!(remote.items().await.is_empty());
    assert!(store.get_entries().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_pull_leaves_local_entries_untouched() {
    init_test_tracing();
    let scenario = SyncFailScenario::setup(&[(RECONCILE_BEFORE_PULL, "return(injected)")]);

    let store = store_with_list(ListId(7)).await;
    let remote = MemoryRemote::with_list_id(ListId(7));
    seed_remote_list(&remote, [2, 3], Utc::now()).await;
    let subjects = MemorySubjects::new();
    let item_ids = seed_fetched_subjects(&subjects, [1]).await;
    let reconciler = create_reconciler(
        &store,
        remote.clone(),
        &subjects,
        AuthState::Authenticated,
        2,
    );
    reconciler.follow(item_ids[0]).await.unwrap();

    let err = reconciler.sync().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FailpointInjected);
    let entries = store.get_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].item_id, item_ids[0]);
    assert_eq!(entries[0].pending_action, PendingAction::None);
    assert_eq!(remote.call_counts().await.fetch_list_items, 0);
    assert!(
        !reconciler
            .need_sync(std::time::Duration::from_secs(60))
            .await
            .unwrap()
    );

    scenario.teardown();
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.pulled, Some(3));
    assert_eq!(reconciler.followed_entries().await.unwrap().len(), 3);
}
