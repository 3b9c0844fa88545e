mod common;

use common::{entries, ids, quiet_options, recorder, track};
use playlist_sync_engine::api::mock::MockPlaylistService;
use playlist_sync_engine::api::PlaylistService;
use playlist_sync_engine::error::Result;
use playlist_sync_engine::models::{PendingKind, PlaylistEntry, SelectedPlaylist, Track, TrackSyncState};
use playlist_sync_engine::{ConfirmOutcome, ErrorKind, PlaylistSynchronizer, RevertOutcome};
use std::sync::Arc;
use tokio::sync::Notify;

fn sync_with_mock(mock: Arc<MockPlaylistService>) -> PlaylistSynchronizer {
    PlaylistSynchronizer::new(mock, quiet_options())
}

/// add_track blocks until the test opens the gate.
struct GatedService {
    gate: Arc<Notify>,
}

#[async_trait::async_trait]
impl PlaylistService for GatedService {
    fn name(&self) -> &str {
        "gated"
    }
    async fn fetch_playlist(&self, _playlist_id: &str) -> Result<(Vec<PlaylistEntry>, String)> {
        Ok((entries(&["A", "B"]), "s1".into()))
    }
    async fn fetch_snapshot_id(&self, _playlist_id: &str) -> Result<String> {
        Ok("s1".into())
    }
    async fn add_track(&self, _playlist_id: &str, _track_uri: &str) -> Result<String> {
        self.gate.notified().await;
        Ok("s2".into())
    }
    async fn remove_tracks(&self, _playlist_id: &str, _track_uris: &[String]) -> Result<String> {
        Ok("s2".into())
    }
    async fn search_tracks(&self, _query: &str) -> Result<Vec<Track>> {
        Ok(Vec::new())
    }
    async fn fetch_track(&self, track_id: &str) -> Result<Track> {
        Ok(track(track_id))
    }
}

#[tokio::test]
async fn scenario_add_then_confirm_adopts_new_snapshot() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    sync.set_tracks(entries(&["A", "B"]), "p1", "s1");

    sync.optimistically_add(track("C"));
    assert_eq!(ids(&sync.tracks()), vec!["C", "A", "B"]);
    assert_eq!(sync.state_of("C"), TrackSyncState::PendingAdd);

    let outcome = sync.confirm("C", Some("s2"));
    assert_eq!(outcome, ConfirmOutcome::Confirmed { adopted_snapshot: true });
    assert_eq!(sync.snapshot_id().as_deref(), Some("s2"));
    assert_eq!(sync.pending_count(), 0);
    assert_eq!(ids(&sync.tracks()), vec!["C", "A", "B"]);
    sync.teardown();
}

#[tokio::test]
async fn optimistic_add_notifies_synchronously_with_track_first() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    sync.set_tracks(entries(&["A", "B"]), "p1", "s1");
    let (seen, cb) = recorder();
    let _sub = sync.subscribe(cb);

    sync.optimistically_add(track("C"));
    let seen = seen.lock().unwrap();
    // catch-up call on subscribe, then the optimistic add
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1][0], "C");
    let added = &sync.tracks()[0];
    assert_eq!(added.added_by.as_deref(), Some("tester"));
}

#[tokio::test]
async fn add_is_visible_before_remote_call_completes() {
    let gate = Arc::new(Notify::new());
    let sync = PlaylistSynchronizer::new(Arc::new(GatedService { gate: gate.clone() }), quiet_options());
    sync.load("p1").await.unwrap();
    let (seen, cb) = recorder();
    let _sub = sync.subscribe(cb);

    let worker = sync.clone();
    let handle = tokio::spawn(async move { worker.add(track("C")).await });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // Remote call is still parked on the gate.
    assert_eq!(sync.state_of("C"), TrackSyncState::PendingAdd);
    assert_eq!(seen.lock().unwrap().last().unwrap()[0], "C");

    gate.notify_one();
    let snapshot = handle.await.unwrap().unwrap();
    assert_eq!(snapshot, "s2");
    assert_eq!(sync.state_of("C"), TrackSyncState::Idle);
    assert_eq!(ids(&sync.tracks()), vec!["C", "A", "B"]);
}

#[tokio::test]
async fn remove_during_inflight_add_settles_each_operation_separately() {
    let gate = Arc::new(Notify::new());
    let sync = PlaylistSynchronizer::new(Arc::new(GatedService { gate: gate.clone() }), quiet_options());
    sync.load("p1").await.unwrap();

    let worker = sync.clone();
    let handle = tokio::spawn(async move { worker.add(track("C")).await });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(sync.state_of("C"), TrackSyncState::PendingAdd);

    // The remove answers first; the add stays pending.
    sync.remove("C").await.unwrap();
    assert_eq!(sync.pending_count(), 1);
    assert_eq!(sync.state_of("C"), TrackSyncState::PendingAdd);
    assert_eq!(ids(&sync.tracks()), vec!["A", "B"]);

    gate.notify_one();
    handle.await.unwrap().unwrap();
    assert_eq!(sync.pending_count(), 0);
    assert_eq!(sync.state_of("C"), TrackSyncState::Idle);
    assert_eq!(ids(&sync.tracks()), vec!["A", "B"]);
}

#[tokio::test]
async fn confirm_kind_only_settles_matching_operation() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    sync.set_tracks(entries(&["A"]), "p1", "s1");
    sync.optimistically_add(track("C"));
    sync.optimistically_remove("C");
    assert_eq!(sync.state_of("C"), TrackSyncState::PendingRemove);

    assert_eq!(
        sync.confirm_kind("C", PendingKind::Remove, None),
        ConfirmOutcome::Confirmed { adopted_snapshot: false }
    );
    assert_eq!(sync.state_of("C"), TrackSyncState::PendingAdd);
    assert_eq!(sync.confirm_kind("C", PendingKind::Remove, None), ConfirmOutcome::NotPending);

    let before = sync.snapshot();
    assert_eq!(
        sync.revert_kind(&["C".to_string()], PendingKind::Add, &before),
        RevertOutcome::Reverted
    );
    assert_eq!(sync.pending_count(), 0);
}

#[tokio::test]
async fn failed_add_reverts_to_exact_prior_list() {
    let mock = Arc::new(MockPlaylistService::with_tracks(100, vec![track("A"), track("B")]));
    mock.add_to_catalog(track("C"));
    let sync = sync_with_mock(mock.clone());
    sync.load("p1").await.unwrap();
    let before = ids(&sync.tracks());
    let (seen, cb) = recorder();
    let _sub = sync.subscribe(cb);

    mock.fail_next(ErrorKind::Server);
    let err = sync.add(track("C")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Server);
    assert!(err.retryable());

    assert_eq!(ids(&sync.tracks()), before);
    assert_eq!(sync.pending_count(), 0);
    // catch-up, optimistic add, rollback
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[1][0], "C");
    assert_eq!(seen[2], before);
}

#[tokio::test]
async fn failed_remove_reverts_to_exact_prior_list() {
    let mock = Arc::new(MockPlaylistService::with_tracks(100, vec![track("A"), track("B"), track("C")]));
    let sync = sync_with_mock(mock.clone());
    sync.load("p1").await.unwrap();

    mock.fail_next(ErrorKind::RateLimited { retry_after: None });
    let err = sync.remove("B").await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(ids(&sync.tracks()), vec!["A", "B", "C"]);
    assert_eq!(sync.state_of("B"), TrackSyncState::Idle);
    assert_eq!(mock.remote_track_ids(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn successful_remove_updates_remote_and_local() {
    let mock = Arc::new(MockPlaylistService::with_tracks(100, vec![track("A"), track("B")]));
    let sync = sync_with_mock(mock.clone());
    sync.load("p1").await.unwrap();

    let snapshot = sync.remove("A").await.unwrap();
    assert_eq!(snapshot, mock.current_snapshot_id());
    assert_eq!(sync.snapshot_id(), Some(snapshot));
    assert_eq!(ids(&sync.tracks()), vec!["B"]);
    assert_eq!(mock.remote_track_ids(), vec!["B"]);
}

#[tokio::test]
async fn removing_unknown_track_is_rejected_without_mutation() {
    let mock = Arc::new(MockPlaylistService::with_tracks(100, vec![track("A")]));
    let sync = sync_with_mock(mock.clone());
    sync.load("p1").await.unwrap();

    let err = sync.remove("Z").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(mock.delete_calls(), 0);
    assert_eq!(sync.pending_count(), 0);
}

#[tokio::test]
async fn confirm_twice_is_a_no_op() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    sync.set_tracks(entries(&["A"]), "p1", "s1");
    sync.optimistically_add(track("C"));

    assert_eq!(sync.confirm("C", Some("s2")), ConfirmOutcome::Confirmed { adopted_snapshot: true });
    assert_eq!(sync.confirm("C", Some("s3")), ConfirmOutcome::NotPending);
    assert_eq!(sync.snapshot_id().as_deref(), Some("s2"));
}

#[tokio::test]
async fn confirm_with_same_snapshot_does_not_adopt() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    sync.set_tracks(entries(&["A"]), "p1", "s1");
    sync.optimistically_remove("A");
    assert_eq!(sync.state_of("A"), TrackSyncState::PendingRemove);
    assert_eq!(sync.confirm("A", Some("s1")), ConfirmOutcome::Confirmed { adopted_snapshot: false });
    assert_eq!(sync.confirm("A", None), ConfirmOutcome::NotPending);
}

#[tokio::test]
async fn late_confirm_and_revert_after_teardown_are_tolerated() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    sync.set_tracks(entries(&["A", "B"]), "p1", "s1");
    let (seen, cb) = recorder();
    let _sub = sync.subscribe(cb);
    let before = sync.snapshot();
    sync.optimistically_add(track("C"));

    sync.teardown();
    assert_eq!(sync.subscriber_count(), 0);
    assert_eq!(sync.confirm("C", Some("s2")), ConfirmOutcome::NotPending);
    assert_eq!(sync.revert("C", &before), RevertOutcome::NotPending);
    assert!(sync.tracks().is_empty());
    assert!(sync.snapshot_id().is_none());
    // nothing delivered after teardown
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn late_subscriber_catches_up_and_can_unsubscribe() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    let (early, cb) = recorder();
    let _early_sub = sync.subscribe(cb);
    assert!(early.lock().unwrap().is_empty(), "empty list is not replayed");

    sync.set_tracks(entries(&["A", "B"]), "p1", "s1");
    let (late, cb) = recorder();
    let late_sub = sync.subscribe(cb);
    assert_eq!(late.lock().unwrap().as_slice(), &[vec!["A".to_string(), "B".to_string()]]);

    late_sub.unsubscribe();
    sync.optimistically_remove("A");
    assert_eq!(late.lock().unwrap().len(), 1);
    assert_eq!(early.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn panicking_subscriber_does_not_break_mutations() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    sync.set_tracks(entries(&["A"]), "p1", "s1");
    let _bad = sync.subscribe(|_: &[PlaylistEntry]| panic!("subscriber bug"));
    let (seen, cb) = recorder();
    let _good = sync.subscribe(cb);

    sync.optimistically_add(track("B"));
    assert_eq!(seen.lock().unwrap().last().unwrap(), &vec!["B".to_string(), "A".to_string()]);
}

#[tokio::test]
async fn mutations_require_a_loaded_playlist() {
    let sync = sync_with_mock(Arc::new(MockPlaylistService::new(100)));
    let err = sync.add(track("A")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotConnected);
    assert!(sync.tracks().is_empty());
}

#[tokio::test]
async fn load_selected_reads_the_stored_pointer() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let db_path = dir.path().join("sync.db");
    let sync = sync_with_mock(Arc::new(MockPlaylistService::with_tracks(100, vec![track("A")])));

    let err = sync.load_selected(&db_path).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotConnected);

    {
        let conn = playlist_sync_engine::db::open_or_create(&db_path).unwrap();
        playlist_sync_engine::db::save_selected_playlist(
            &conn,
            &SelectedPlaylist {
                playlist_id: "p7".into(),
                name: "Road trip".into(),
            },
        )
        .unwrap();
    }
    let selected = sync.load_selected(&db_path).await.unwrap();
    assert_eq!(selected.name, "Road trip");
    assert_eq!(sync.playlist_id().as_deref(), Some("p7"));
    assert_eq!(ids(&sync.tracks()), vec!["A"]);
}

#[tokio::test]
async fn add_by_id_materializes_full_track() {
    let mock = Arc::new(MockPlaylistService::with_tracks(100, vec![track("A")]));
    let mut full = track("C");
    full.duration_ms = 201_000;
    mock.add_to_catalog(full);
    let sync = sync_with_mock(mock.clone());
    sync.load("p1").await.unwrap();

    sync.add_by_id("C").await.unwrap();
    let first = &sync.tracks()[0];
    assert_eq!(first.track.id, "C");
    assert_eq!(first.track.duration_ms, 201_000);
    assert_eq!(mock.remote_track_ids(), vec!["C", "A"]);
}
