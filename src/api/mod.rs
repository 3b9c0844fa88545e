pub mod authorize;
pub mod mock;
pub mod oauth;
pub mod pkce;
pub mod spotify;

use crate::error::Result;
use crate::models::{PlaylistEntry, Track};

/// Per-call adapter over the remote playlist service.
/// Implementations: spotify::SpotifyPlaylistService, mock::MockPlaylistService.
#[async_trait::async_trait]
pub trait PlaylistService: Send + Sync {
    /// Fetch the full playlist content and its snapshot id.
    async fn fetch_playlist(&self, playlist_id: &str) -> Result<(Vec<PlaylistEntry>, String)>;

    /// Cheap form of `fetch_playlist` returning only the snapshot id.
    async fn fetch_snapshot_id(&self, playlist_id: &str) -> Result<String>;

    /// Insert a track at the head of the playlist; returns the new snapshot id.
    async fn add_track(&self, playlist_id: &str, track_uri: &str) -> Result<String>;

    /// Remove tracks, batching as needed; returns the last batch's snapshot id.
    async fn remove_tracks(&self, playlist_id: &str, track_uris: &[String]) -> Result<String>;

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>>;

    async fn fetch_track(&self, track_id: &str) -> Result<Track>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Split `items` into consecutive batches of at most `cap` elements.
pub fn batches<T>(items: &[T], cap: usize) -> std::slice::Chunks<'_, T> {
    items.chunks(cap.max(1))
}
