use super::{batches, PlaylistService};
use crate::config::Config;
use crate::credentials::CredentialManager;
use crate::error::{error_from_response, ErrorKind, PlaylistError, Result};
use crate::models::{Album, Image, PlaylistEntry, Track};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Projection used for full playlist fetches: only what a `PlaylistEntry` needs.
const PLAYLIST_FIELDS: &str = "snapshot_id,tracks.items(added_at,added_by.id,track(id,name,uri,duration_ms,popularity,external_urls.spotify,artists(name),album(name,images))),tracks.next";

const SEARCH_LIMIT: u32 = 20;

/// Remote playlist adapter for the Spotify Web API.
/// Every request takes its bearer token from the `CredentialManager`.
pub struct SpotifyPlaylistService {
    client: Client,
    api_base: String,
    credentials: Arc<CredentialManager>,
    remove_batch_size: usize,
}

impl SpotifyPlaylistService {
    pub fn new(api_base: String, credentials: Arc<CredentialManager>, remove_batch_size: usize) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials,
            remove_batch_size: remove_batch_size.max(1),
        }
    }

    pub fn from_config(cfg: &Config, credentials: Arc<CredentialManager>) -> Self {
        Self::new(cfg.api_base.clone(), credentials, cfg.remove_batch_size)
    }

    /// Send a request built by `build` with the current bearer token. A 401
    /// saying the token expired triggers one refresh and a single retry.
    async fn send_authed<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let bearer = self.credentials.bearer().await?;
        let resp = build(&bearer).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check(resp).await;
        }

        let err = error_from_response(resp).await;
        if err.kind != ErrorKind::TokenExpired {
            return Err(err);
        }
        warn!("access token rejected as expired; refreshing and retrying once");
        let stale = bearer.trim_start_matches("Bearer ");
        let cred = self.credentials.force_refresh(stale).await?;
        let bearer2 = format!("Bearer {}", cred.access_token);
        let resp2 = build(&bearer2).send().await?;
        check(resp2).await
    }

    async fn fetch_playlist_internal(&self, playlist_id: &str) -> Result<(Vec<PlaylistEntry>, String)> {
        let url = format!(
            "{}/playlists/{}?fields={}",
            self.api_base,
            playlist_id,
            urlencoding::encode(PLAYLIST_FIELDS)
        );
        let resp = self
            .send_authed(|bearer| self.client.get(&url).header(AUTHORIZATION, bearer))
            .await?;
        let j: Value = resp.json().await?;
        let snapshot_id = snapshot_from(&j)?;

        let mut entries = Vec::new();
        push_entries(&mut entries, &j["tracks"]["items"]);
        let mut next = j["tracks"]["next"].as_str().map(|s| s.to_string());
        while let Some(page_url) = next {
            let resp = self
                .send_authed(|bearer| self.client.get(&page_url).header(AUTHORIZATION, bearer))
                .await?;
            let page: Value = resp.json().await?;
            push_entries(&mut entries, &page["items"]);
            next = page["next"].as_str().map(|s| s.to_string());
        }
        debug!(
            "fetched playlist {} ({} entries, snapshot {})",
            playlist_id,
            entries.len(),
            snapshot_id
        );
        Ok((entries, snapshot_id))
    }
}

async fn check(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(error_from_response(resp).await)
    }
}

fn snapshot_from(j: &Value) -> Result<String> {
    j["snapshot_id"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| PlaylistError::new(ErrorKind::Decode, "response has no snapshot_id"))
}

fn push_entries(out: &mut Vec<PlaylistEntry>, items: &Value) {
    let Some(items) = items.as_array() else {
        return;
    };
    for it in items {
        // Local files and unavailable tracks come back with a null track or id.
        let Some(track) = parse_track(&it["track"]) else {
            continue;
        };
        let added_at = it["added_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        out.push(PlaylistEntry {
            track,
            added_at,
            added_by: it["added_by"]["id"].as_str().map(|s| s.to_string()),
        });
    }
}

pub(crate) fn parse_track(j: &Value) -> Option<Track> {
    let id = j["id"].as_str()?.to_string();
    let uri = j["uri"].as_str()?.to_string();
    let artists = j["artists"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|x| x["name"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let images = j["album"]["images"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|img| {
                    Some(Image {
                        url: img["url"].as_str()?.to_string(),
                        width: img["width"].as_u64().map(|w| w as u32),
                        height: img["height"].as_u64().map(|h| h as u32),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(Track {
        id,
        name: j["name"].as_str().unwrap_or("").to_string(),
        artists,
        album: Album {
            name: j["album"]["name"].as_str().unwrap_or("").to_string(),
            images,
        },
        duration_ms: j["duration_ms"].as_u64().unwrap_or(0),
        popularity: j["popularity"].as_u64().unwrap_or(0) as u32,
        uri,
        external_url: j["external_urls"]["spotify"].as_str().map(|s| s.to_string()),
    })
}

#[async_trait]
impl PlaylistService for SpotifyPlaylistService {
    fn name(&self) -> &str {
        "spotify"
    }

    async fn fetch_playlist(&self, playlist_id: &str) -> Result<(Vec<PlaylistEntry>, String)> {
        self.fetch_playlist_internal(playlist_id).await
    }

    async fn fetch_snapshot_id(&self, playlist_id: &str) -> Result<String> {
        let url = format!("{}/playlists/{}?fields=snapshot_id", self.api_base, playlist_id);
        let resp = self
            .send_authed(|bearer| self.client.get(&url).header(AUTHORIZATION, bearer))
            .await?;
        let j: Value = resp.json().await?;
        snapshot_from(&j)
    }

    async fn add_track(&self, playlist_id: &str, track_uri: &str) -> Result<String> {
        let url = format!("{}/playlists/{}/tracks", self.api_base, playlist_id);
        let body = json!({ "uris": [track_uri], "position": 0 });
        let resp = self
            .send_authed(|bearer| {
                self.client
                    .post(&url)
                    .header(AUTHORIZATION, bearer)
                    .json(&body)
            })
            .await?;
        let j: Value = resp.json().await?;
        snapshot_from(&j)
    }

    async fn remove_tracks(&self, playlist_id: &str, track_uris: &[String]) -> Result<String> {
        if track_uris.is_empty() {
            return Err(PlaylistError::new(ErrorKind::InvalidRequest, "no tracks to remove"));
        }
        let url = format!("{}/playlists/{}/tracks", self.api_base, playlist_id);
        let total = track_uris.len().div_ceil(self.remove_batch_size);
        let mut snapshot_id = String::new();
        for (i, batch) in batches(track_uris, self.remove_batch_size).enumerate() {
            let tracks: Vec<Value> = batch.iter().map(|u| json!({ "uri": u })).collect();
            let body = json!({ "tracks": tracks });
            let resp = self
                .send_authed(|bearer| {
                    self.client
                        .delete(&url)
                        .header(AUTHORIZATION, bearer)
                        .json(&body)
                })
                .await
                .map_err(|e| {
                    warn!("remove batch {}/{} failed: {}", i + 1, total, e);
                    e
                })?;
            let j: Value = resp.json().await?;
            snapshot_id = snapshot_from(&j)?;
            debug!("removed batch {}/{} ({} tracks)", i + 1, total, batch.len());
        }
        Ok(snapshot_id)
    }

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>> {
        let url = format!(
            "{}/search?q={}&type=track&limit={}",
            self.api_base,
            urlencoding::encode(query),
            SEARCH_LIMIT
        );
        let resp = self
            .send_authed(|bearer| {
                self.client
                    .get(&url)
                    .header(AUTHORIZATION, bearer)
                    .header(ACCEPT, "application/json")
            })
            .await?;
        let j: Value = resp.json().await?;
        Ok(j["tracks"]["items"]
            .as_array()
            .map(|a| a.iter().filter_map(parse_track).collect())
            .unwrap_or_default())
    }

    async fn fetch_track(&self, track_id: &str) -> Result<Track> {
        let url = format!("{}/tracks/{}", self.api_base, track_id);
        let resp = self
            .send_authed(|bearer| self.client.get(&url).header(AUTHORIZATION, bearer))
            .await?;
        let j: Value = resp.json().await?;
        parse_track(&j).ok_or_else(|| {
            PlaylistError::new(ErrorKind::Decode, format!("track {} has no id or uri", track_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_track_reads_nested_fields() {
        let j = json!({
            "id": "t1",
            "name": "Song",
            "uri": "spotify:track:t1",
            "duration_ms": 215000,
            "popularity": 42,
            "external_urls": {"spotify": "https://open.spotify.com/track/t1"},
            "artists": [{"name": "A"}, {"name": "B"}],
            "album": {"name": "Album", "images": [{"url": "https://i/1.jpg", "width": 640, "height": 640}]}
        });
        let t = parse_track(&j).unwrap();
        assert_eq!(t.artists, vec!["A", "B"]);
        assert_eq!(t.album.images[0].width, Some(640));
        assert_eq!(t.duration_ms, 215000);
        assert_eq!(t.external_url.as_deref(), Some("https://open.spotify.com/track/t1"));
    }

    #[test]
    fn null_tracks_are_skipped() {
        let items = json!([
            {"added_at": "2024-01-01T00:00:00Z", "track": null},
            {"added_at": "2024-01-02T00:00:00Z", "added_by": {"id": "u1"},
             "track": {"id": "t2", "uri": "spotify:track:t2", "name": "Two"}}
        ]);
        let mut out = Vec::new();
        push_entries(&mut out, &items);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].added_by.as_deref(), Some("u1"));
        assert_eq!(out[0].track.duration_ms, 0);
    }
}
