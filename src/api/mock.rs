use super::{batches, PlaylistService};
use crate::error::{ErrorKind, PlaylistError, Result};
use crate::models::{PlaylistEntry, Track};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::info;

#[derive(Default)]
struct Remote {
    entries: Vec<PlaylistEntry>,
    version: u64,
    catalog: HashMap<String, Track>,
    failures: VecDeque<ErrorKind>,
}

/// In-memory stand-in for the remote playlist service, used in tests and by
/// the CLI's offline mode. Every mutation bumps a version counter that is
/// exposed as the snapshot id (`"snap-<n>"`).
pub struct MockPlaylistService {
    remote: Mutex<Remote>,
    batch_size: usize,
    snapshot_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    add_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MockPlaylistService {
    pub fn new(batch_size: usize) -> Self {
        Self {
            remote: Mutex::new(Remote::default()),
            batch_size: batch_size.max(1),
            snapshot_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            add_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Seed the remote playlist (and the catalog) with `tracks`, in order.
    pub fn with_tracks(batch_size: usize, tracks: Vec<Track>) -> Self {
        let svc = Self::new(batch_size);
        {
            let mut r = svc.lock();
            for t in tracks {
                r.catalog.insert(t.id.clone(), t.clone());
                r.entries.push(PlaylistEntry {
                    track: t,
                    added_at: Utc::now(),
                    added_by: Some("mock".into()),
                });
            }
            r.version = 1;
        }
        svc
    }

    /// Small seeded playlist plus a few catalog-only tracks, so the CLI's
    /// offline mode can search, add and remove without a remote.
    pub fn demo(batch_size: usize) -> Self {
        let demo_track = |id: &str, name: &str, artist: &str| {
            Track::partial(id, name, vec![artist.to_string()], &format!("mock:track:{}", id))
        };
        let svc = Self::with_tracks(
            batch_size,
            vec![
                demo_track("demo-1", "Harbour Lights", "The Tidewaters"),
                demo_track("demo-2", "Paper Moon Radio", "Nightjar"),
            ],
        );
        svc.add_to_catalog(demo_track("demo-3", "Lantern Song", "The Tidewaters"));
        svc.add_to_catalog(demo_track("demo-4", "Slow Engines", "Nightjar"));
        svc
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Remote> {
        self.remote.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make a track resolvable through `fetch_track` / `search_tracks`.
    pub fn add_to_catalog(&self, track: Track) {
        self.lock().catalog.insert(track.id.clone(), track);
    }

    /// Fail the next remote call with `kind`. Queued failures are consumed in order.
    pub fn fail_next(&self, kind: ErrorKind) {
        self.lock().failures.push_back(kind);
    }

    /// Simulate another client editing the playlist.
    pub fn external_insert(&self, track: Track) {
        let mut r = self.lock();
        r.catalog.insert(track.id.clone(), track.clone());
        r.entries.insert(
            0,
            PlaylistEntry {
                track,
                added_at: Utc::now(),
                added_by: Some("other-client".into()),
            },
        );
        r.version += 1;
    }

    pub fn current_snapshot_id(&self) -> String {
        snapshot_name(self.lock().version)
    }

    pub fn remote_track_ids(&self) -> Vec<String> {
        self.lock().entries.iter().map(|e| e.track.id.clone()).collect()
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn take_failure(r: &mut Remote) -> Result<()> {
        match r.failures.pop_front() {
            Some(kind) => Err(PlaylistError::new(kind, "injected failure")),
            None => Ok(()),
        }
    }
}

fn snapshot_name(version: u64) -> String {
    format!("snap-{}", version)
}

#[async_trait]
impl PlaylistService for MockPlaylistService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_playlist(&self, playlist_id: &str) -> Result<(Vec<PlaylistEntry>, String)> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut r = self.lock();
        Self::take_failure(&mut r)?;
        info!("MockPlaylistService: fetch_playlist {}", playlist_id);
        Ok((r.entries.clone(), snapshot_name(r.version)))
    }

    async fn fetch_snapshot_id(&self, _playlist_id: &str) -> Result<String> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let mut r = self.lock();
        Self::take_failure(&mut r)?;
        Ok(snapshot_name(r.version))
    }

    async fn add_track(&self, playlist_id: &str, track_uri: &str) -> Result<String> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        let mut r = self.lock();
        Self::take_failure(&mut r)?;
        let track = r
            .catalog
            .values()
            .find(|t| t.uri == track_uri)
            .cloned()
            .ok_or_else(|| PlaylistError::new(ErrorKind::NotFound, format!("unknown uri {}", track_uri)))?;
        info!("MockPlaylistService: add_track {} -> {}", playlist_id, track_uri);
        r.entries.insert(
            0,
            PlaylistEntry {
                track,
                added_at: Utc::now(),
                added_by: Some("mock".into()),
            },
        );
        r.version += 1;
        Ok(snapshot_name(r.version))
    }

    async fn remove_tracks(&self, playlist_id: &str, track_uris: &[String]) -> Result<String> {
        if track_uris.is_empty() {
            return Err(PlaylistError::new(ErrorKind::InvalidRequest, "no tracks to remove"));
        }
        let mut r = self.lock();
        for batch in batches(track_uris, self.batch_size) {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            Self::take_failure(&mut r)?;
            r.entries.retain(|e| !batch.contains(&e.track.uri));
            r.version += 1;
        }
        info!("MockPlaylistService: remove_tracks {} -> {} tracks", playlist_id, track_uris.len());
        Ok(snapshot_name(r.version))
    }

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>> {
        let mut r = self.lock();
        Self::take_failure(&mut r)?;
        let q = query.to_lowercase();
        let mut found: Vec<Track> = r
            .catalog
            .values()
            .filter(|t| {
                t.name.to_lowercase().contains(&q)
                    || t.artists.iter().any(|a| a.to_lowercase().contains(&q))
            })
            .map(|t| Track::partial(&t.id, &t.name, t.artists.clone(), &t.uri))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn fetch_track(&self, track_id: &str) -> Result<Track> {
        let mut r = self.lock();
        Self::take_failure(&mut r)?;
        r.catalog
            .get(track_id)
            .cloned()
            .ok_or_else(|| PlaylistError::new(ErrorKind::NotFound, format!("unknown track {}", track_id)))
    }
}
