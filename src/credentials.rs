//! Credential lifecycle: the single stored OAuth credential, refreshed before
//! it gets close to expiry.

use crate::api::oauth::{OAuthClient, TokenResponse};
use crate::db;
use crate::error::{ErrorKind, PlaylistError, Result};
use crate::models::Credential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Storage for the one live credential record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credential>>;
    async fn create(&self, cred: &Credential) -> Result<()>;
    async fn update(&self, cred: &Credential) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// SQLite-backed store; every call opens a short-lived connection on the
/// blocking pool.
pub struct SqliteCredentialStore {
    db_path: PathBuf,
}

impl SqliteCredentialStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let conn = db::open_or_create(&db_path)?;
            f(&conn)
        })
        .await
        .map_err(|e| PlaylistError::new(ErrorKind::Storage, e.to_string()))?
        .map_err(|e| PlaylistError::new(ErrorKind::Storage, format!("{:#}", e)))
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        self.with_conn(|conn| db::load_credential(conn)).await
    }

    async fn create(&self, cred: &Credential) -> Result<()> {
        let cred = cred.clone();
        self.with_conn(move |conn| db::insert_credential(conn, &cred)).await
    }

    async fn update(&self, cred: &Credential) -> Result<()> {
        let cred = cred.clone();
        self.with_conn(move |conn| db::update_credential(conn, &cred)).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| db::delete_credential(conn, &id).map(|_| ()))
            .await
    }
}

/// Hands out access tokens with at least `margin` of remaining validity.
///
/// Refreshes are serialized: callers that hit the expiry window together
/// wait on `refresh_guard`, then re-read the store and reuse whatever the
/// first caller wrote.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    oauth: OAuthClient,
    margin: chrono::Duration,
    refresh_guard: tokio::sync::Mutex<()>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn CredentialStore>, oauth: OAuthClient, margin: chrono::Duration) -> Self {
        Self {
            store,
            oauth,
            margin,
            refresh_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// Return the stored credential, refreshing it first when it expires
    /// within the safety margin. `Ok(None)` means the deployment has never
    /// been authorized.
    pub async fn get_valid_credential(&self) -> Result<Option<Credential>> {
        let cred = match self.store.load().await? {
            Some(c) => c,
            None => return Ok(None),
        };
        if !cred.expires_within(self.margin, Utc::now()) {
            return Ok(Some(cred));
        }

        let _guard = self.refresh_guard.lock().await;
        // Another caller may have refreshed while we waited.
        let cred = match self.store.load().await? {
            Some(c) => c,
            None => return Ok(None),
        };
        if !cred.expires_within(self.margin, Utc::now()) {
            debug!("credential refreshed by a concurrent caller");
            return Ok(Some(cred));
        }
        debug!(expires_at = %cred.expires_at, "credential within refresh margin, refreshing");
        self.refresh_locked(cred).await.map(Some)
    }

    /// `Authorization` header value for the current credential.
    pub async fn bearer(&self) -> Result<String> {
        let cred = self.get_valid_credential().await?.ok_or_else(|| {
            PlaylistError::new(ErrorKind::NoCredential, "no credential stored; authorize first")
        })?;
        Ok(format!("Bearer {}", cred.access_token))
    }

    /// Refresh after the remote rejected `stale_access_token` as expired,
    /// unless someone already replaced that token.
    pub async fn force_refresh(&self, stale_access_token: &str) -> Result<Credential> {
        let _guard = self.refresh_guard.lock().await;
        let cred = self.store.load().await?.ok_or_else(|| {
            PlaylistError::new(ErrorKind::NoCredential, "no credential stored; authorize first")
        })?;
        if cred.access_token != stale_access_token {
            return Ok(cred);
        }
        self.refresh_locked(cred).await
    }

    // Caller holds refresh_guard.
    async fn refresh_locked(&self, mut cred: Credential) -> Result<Credential> {
        let tr = match self.oauth.refresh(&cred.refresh_token).await {
            Ok(tr) => tr,
            Err(e) => {
                if e.kind == ErrorKind::InvalidGrant {
                    warn!("refresh token rejected; re-authorization required");
                } else {
                    warn!("token refresh failed: {}", e);
                }
                return Err(e);
            }
        };
        apply_token_response(&mut cred, &tr, Utc::now());
        self.store.update(&cred).await?;
        info!(credential_id = %cred.id, expires_at = %cred.expires_at, "credential refreshed");
        Ok(cred)
    }

    /// Persist the result of a first authorization. Reuses the existing
    /// record when there is one so the deployment never holds two.
    pub async fn store_authorization(&self, tr: &TokenResponse) -> Result<Credential> {
        let _guard = self.refresh_guard.lock().await;
        let now = Utc::now();
        match self.store.load().await? {
            Some(mut existing) => {
                apply_token_response(&mut existing, tr, now);
                self.store.update(&existing).await?;
                info!(credential_id = %existing.id, "credential replaced after authorization");
                Ok(existing)
            }
            None => {
                let refresh_token = tr.refresh_token.clone().ok_or_else(|| {
                    PlaylistError::new(ErrorKind::Decode, "token response has no refresh_token")
                })?;
                let cred = Credential {
                    id: uuid::Uuid::new_v4().to_string(),
                    access_token: tr.access_token.clone(),
                    refresh_token,
                    expires_at: expiry_from(now, tr.expires_in),
                    created_at: now,
                };
                self.store.create(&cred).await?;
                info!(credential_id = %cred.id, "credential created");
                Ok(cred)
            }
        }
    }

    /// Remove the stored credential. Returns whether one existed.
    pub async fn disconnect(&self) -> Result<bool> {
        let _guard = self.refresh_guard.lock().await;
        match self.store.load().await? {
            Some(c) => {
                self.store.delete(&c.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    now + chrono::Duration::seconds(expires_in)
}

fn apply_token_response(cred: &mut Credential, tr: &TokenResponse, now: DateTime<Utc>) {
    cred.access_token = tr.access_token.clone();
    if let Some(rt) = &tr.refresh_token {
        cred.refresh_token = rt.clone();
    }
    cred.expires_at = expiry_from(now, tr.expires_in);
}
