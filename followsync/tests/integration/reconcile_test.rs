use std::time::Duration;

use chrono::Utc;
use followsync::error::ErrorKind;
use followsync::remote::memory::MemoryRemote;
use followsync::store::both::memory::MemoryStore;
use followsync::store::entry::EntryStore;
use followsync::subject::SubjectRepository;
use followsync::subject::memory::MemorySubjects;
use followsync::test_utils::fixtures::{
    create_reconciler, seed_fetched_subjects, seed_remote_list, test_subject,
};
use followsync::test_utils::remote::{FaultConfig, FaultInjectingRemote, FaultType, GatedRemote};
use followsync::types::{AuthState, ListId, PendingAction};
use telemetry::init_test_tracing;

async fn store_with_list(list_id: ListId) -> MemoryStore {
    let store = MemoryStore::new();
    store.set_cached_list_identity(list_id).await.unwrap();
    store
}

#[tokio::test(flavor = "multi_thread")]
async fn follow_during_a_pass_survives_the_pull() {
    init_test_tracing();
    let store = store_with_list(ListId(7)).await;
    let remote = GatedRemote::wrap(MemoryRemote::with_list_id(ListId(7)));
    seed_remote_list(remote.get_inner(), [1], Utc::now()).await;
    let subjects = MemorySubjects::new();
    let item_ids = seed_fetched_subjects(&subjects, [1, 2]).await;
    let reconciler = create_reconciler(
        &store,
        remote.clone(),
        &subjects,
        AuthState::Authenticated,
        2,
    );

    let first = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.sync().await }
    });
    remote.wait_until_entered().await;

    // The pass is suspended in its pull phase, a local follow and a second trigger happen now.
    let followed = reconciler.follow(item_ids[1]).await.unwrap();
    let second = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.sync().await }
    });
    while reconciler.coordinator_stats().joined == 0 {
        tokio::task::yield_now().await;
    }
    remote.release();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.pulled, Some(1));

    let entry = store.get_entry_for_item(item_ids[1]).await.unwrap().unwrap();
    assert_eq!(entry.id, followed.id);
    assert_eq!(entry.pending_action, PendingAction::Upload);

    // The next pass flushes the follow that raced with the pull.
    remote.release();
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.pulled, Some(2));
    assert_eq!(
        remote.get_inner().items().await,
        vec![test_subject(1), test_subject(2)]
    );
    assert_eq!(reconciler.coordinator_stats().started, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_push_is_retried_on_the_next_pass() {
    init_test_tracing();
    let store = store_with_list(ListId(7)).await;
    let remote = FaultInjectingRemote::wrap(
        MemoryRemote::with_list_id(ListId(7)),
        FaultConfig {
            push_items: Some(FaultType::Error),
            ..Default::default()
        },
    );
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
    // The pull still ran and left the pending entry alone.
    assert_eq!(remote.get_inner().call_counts().await.fetch_list_items, 1);

    remote.clear_faults().await;
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert!(reconciler.is_following(item_ids[0]).await.unwrap());
    assert_eq!(remote.get_inner().items().await, vec![test_subject(1)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_pull_fails_every_caller_without_poisoning() {
    init_test_tracing();
    let store = store_with_list(ListId(7)).await;
    let remote = FaultInjectingRemote::wrap(
        MemoryRemote::with_list_id(ListId(7)),
        FaultConfig {
            fetch_list_items: Some(FaultType::Panic),
            ..Default::default()
        },
    );
    let subjects = MemorySubjects::new();
    let reconciler = create_reconciler(
        &store,
        remote.clone(),
        &subjects,
        AuthState::Authenticated,
        2,
    );

    let (first, second) = tokio::join!(reconciler.sync(), reconciler.sync());

    assert_eq!(first.unwrap_err().kind(), ErrorKind::TaskPanicked);
    assert_eq!(second.unwrap_err().kind(), ErrorKind::TaskPanicked);

    remote.clear_faults().await;
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.pulled, Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn unfollow_removes_the_remote_item() {
    init_test_tracing();
    let store = store_with_list(ListId(7)).await;
    let remote = MemoryRemote::with_list_id(ListId(7));
    seed_remote_list(&remote, [1, 2], Utc::now()).await;
    let subjects = MemorySubjects::new();
    let reconciler = create_reconciler(
        &store,
        remote.clone(),
        &subjects,
        AuthState::Authenticated,
        2,
    );
    reconciler.sync().await.unwrap();
    let removed = subjects.item_for_remote_id(1).await.unwrap();

    reconciler.unfollow(removed).await.unwrap().unwrap();
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.pulled, Some(1));
    assert_eq!(remote.items().await, vec![test_subject(2)]);
    assert!(!reconciler.is_following(removed).await.unwrap());
    assert_eq!(reconciler.followed_entries().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_refreshes_of_the_running_pass() {
    init_test_tracing();
    let store = store_with_list(ListId(7)).await;
    let remote = MemoryRemote::with_list_id(ListId(7));
    seed_remote_list(&remote, 1..=5, Utc::now()).await;
    let subjects = MemorySubjects::new().with_refresh_delay(Duration::from_millis(10));
    let reconciler = create_reconciler(
        &store,
        remote.clone(),
        &subjects,
        AuthState::Authenticated,
        1,
    );

    let pass = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.sync().await }
    });
    tokio::time::sleep(Duration::from_millis(15)).await;
    reconciler.shutdown();

    let report = pass.await.unwrap().unwrap();

    assert_eq!(report.pulled, Some(5));
    assert_eq!(report.refresh_failures, 5);
    assert!(subjects.total_refreshes().await < 10);

    let err = reconciler.sync().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn abandoned_pass_cancels_its_pending_refreshes() {
    init_test_tracing();
    let store = store_with_list(ListId(7)).await;
    let remote = MemoryRemote::with_list_id(ListId(7));
    seed_remote_list(&remote, 1..=5, Utc::now()).await;
    let subjects = MemorySubjects::new().with_refresh_delay(Duration::from_millis(10));
    let reconciler = create_reconciler(
        &store,
        remote.clone(),
        &subjects,
        AuthState::Authenticated,
        1,
    );

    // The only caller gives up while the first subject's images are refreshing.
    let abandoned = tokio::time::timeout(Duration::from_millis(15), reconciler.sync()).await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Only the metadata and images refreshes of the first subject were ever started.
    assert_eq!(subjects.total_refreshes().await, 2);
    let mut never_refreshed = 0;
    for remote_id in 1..=5 {
        let item_id = subjects.item_for_remote_id(remote_id).await.unwrap();
        if subjects.needs_metadata_refresh(item_id).await.unwrap() {
            never_refreshed += 1;
        }
    }
    assert_eq!(never_refreshed, 4);
    // The abandoned pass still recorded its attempt.
    assert!(!reconciler.need_sync(Duration::from_secs(60)).await.unwrap());

    // A later pass starts a new execution and refreshes what was left.
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.refreshes_started, 5);
    assert_eq!(report.refresh_failures, 0);
    assert_eq!(reconciler.coordinator_stats().started, 2);
}
