mod common;

use common::{ids, quiet_options, recorder, track};
use playlist_sync_engine::api::mock::MockPlaylistService;
use playlist_sync_engine::models::Track;
use playlist_sync_engine::{ErrorKind, PlaylistSynchronizer};
use std::sync::Arc;

fn many(n: usize) -> Vec<Track> {
    (0..n).map(|i| track(&format!("t{:03}", i))).collect()
}

#[tokio::test]
async fn bulk_remove_splits_into_capped_batches() {
    let mut tracks = many(150);
    tracks.push(track("keep"));
    let mock = Arc::new(MockPlaylistService::with_tracks(100, tracks));
    let sync = PlaylistSynchronizer::new(mock.clone(), quiet_options());
    sync.load("p1").await.unwrap();

    let doomed: Vec<String> = (0..150).map(|i| format!("t{:03}", i)).collect();
    let snapshot = sync.bulk_remove(&doomed).await.unwrap();

    assert_eq!(mock.delete_calls(), 2);
    assert_eq!(snapshot, "snap-3");
    assert_eq!(mock.remote_track_ids(), vec!["keep"]);
    assert_eq!(ids(&sync.tracks()), vec!["keep"]);
    assert_eq!(sync.pending_count(), 0);
    assert_eq!(sync.snapshot_id().as_deref(), Some("snap-3"));
}

#[tokio::test]
async fn bulk_remove_is_one_optimistic_update() {
    let mock = Arc::new(MockPlaylistService::with_tracks(100, many(5)));
    let sync = PlaylistSynchronizer::new(mock.clone(), quiet_options());
    sync.load("p1").await.unwrap();
    let (seen, cb) = recorder();
    let _sub = sync.subscribe(cb);

    sync.bulk_remove(&["t001".to_string(), "t003".to_string()])
        .await
        .unwrap();
    let seen = seen.lock().unwrap();
    // catch-up plus a single optimistic notification
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1], vec!["t000", "t002", "t004"]);
}

#[tokio::test]
async fn failed_batch_reverts_the_whole_operation() {
    let mock = Arc::new(MockPlaylistService::with_tracks(2, many(4)));
    let sync = PlaylistSynchronizer::new(mock.clone(), quiet_options());
    sync.load("p1").await.unwrap();
    let before = ids(&sync.tracks());

    mock.fail_next(ErrorKind::Server);
    let all: Vec<String> = before.clone();
    let err = sync.bulk_remove(&all).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Server);
    assert_eq!(mock.delete_calls(), 1);
    assert_eq!(ids(&sync.tracks()), before);
    assert_eq!(sync.pending_count(), 0);
}

#[tokio::test]
async fn unknown_and_duplicate_ids_are_ignored() {
    let mock = Arc::new(MockPlaylistService::with_tracks(100, many(3)));
    let sync = PlaylistSynchronizer::new(mock.clone(), quiet_options());
    sync.load("p1").await.unwrap();

    let request = vec!["t001".to_string(), "t001".to_string(), "nope".to_string()];
    sync.bulk_remove(&request).await.unwrap();
    assert_eq!(mock.delete_calls(), 1);
    assert_eq!(mock.remote_track_ids(), vec!["t000", "t002"]);
}
