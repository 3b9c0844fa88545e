use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub name: String,
    pub images: Vec<Image>,
}

/// A playable track. Search results leave `duration_ms` and `popularity` at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: Album,
    pub duration_ms: u64,
    pub popularity: u32,
    pub uri: String,
    pub external_url: Option<String>,
}

impl Track {
    /// Build a track from the fields a search result always carries.
    pub fn partial(id: &str, name: &str, artists: Vec<String>, uri: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            artists,
            album: Album::default(),
            duration_ms: 0,
            popularity: 0,
            uri: uri.to_string(),
            external_url: None,
        }
    }

    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub track: Track,
    pub added_at: DateTime<Utc>,
    pub added_by: Option<String>,
}

impl PlaylistEntry {
    pub fn track_id(&self) -> &str {
        &self.track.id
    }
}

/// Ordered playlist content plus the remote version token it corresponds to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistSnapshot {
    pub entries: Vec<PlaylistEntry>,
    pub snapshot_id: Option<String>,
}

impl PlaylistSnapshot {
    pub fn track_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.track.id.clone()).collect()
    }
}

/// The single stored OAuth credential for the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// True when the token has less than `margin` of validity left.
    pub fn expires_within(&self, margin: chrono::Duration, now: DateTime<Utc>) -> bool {
        now + margin >= self.expires_at
    }
}

/// Pointer to the playlist the deployment currently syncs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedPlaylist {
    pub playlist_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingKind {
    Add,
    Remove,
}

/// Per-track optimistic state as seen by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSyncState {
    Idle,
    PendingAdd,
    PendingRemove,
}

impl From<Option<PendingKind>> for TrackSyncState {
    fn from(kind: Option<PendingKind>) -> Self {
        match kind {
            None => TrackSyncState::Idle,
            Some(PendingKind::Add) => TrackSyncState::PendingAdd,
            Some(PendingKind::Remove) => TrackSyncState::PendingRemove,
        }
    }
}
