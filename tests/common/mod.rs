#![allow(dead_code)]

use chrono::Utc;
use playlist_sync_engine::models::{Album, PlaylistEntry, Track};
use playlist_sync_engine::SyncOptions;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn track(id: &str) -> Track {
    Track {
        id: id.to_string(),
        name: format!("Song {}", id),
        artists: vec![format!("Artist {}", id)],
        album: Album::default(),
        duration_ms: 180_000,
        popularity: 10,
        uri: format!("spotify:track:{}", id),
        external_url: None,
    }
}

pub fn entries(ids: &[&str]) -> Vec<PlaylistEntry> {
    ids.iter()
        .map(|id| PlaylistEntry {
            track: track(id),
            added_at: Utc::now(),
            added_by: Some("seed".into()),
        })
        .collect()
}

pub fn ids(list: &[PlaylistEntry]) -> Vec<String> {
    list.iter().map(|e| e.track.id.clone()).collect()
}

/// Options whose timers never fire during a normal test.
pub fn quiet_options() -> SyncOptions {
    SyncOptions {
        poll_base: Duration::from_secs(600),
        poll_max: Duration::from_secs(600),
        verify_delay: Duration::from_secs(600),
        mutation_timeout: None,
        added_by: Some("tester".into()),
    }
}

/// Records every list a subscriber receives.
pub fn recorder() -> (Arc<Mutex<Vec<Vec<String>>>>, impl Fn(&[PlaylistEntry]) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let cb = move |list: &[PlaylistEntry]| {
        sink.lock().unwrap().push(ids(list));
    };
    (seen, cb)
}
