use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // OAuth client registration
    #[serde(default)]
    pub client_id: String,
    /// Optional: PKCE public clients have no secret.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    // Endpoints (override in tests / self-hosted mocks)
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_auth_base")]
    pub auth_base: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    // Reconciliation timing
    #[serde(default = "default_poll_base_ms")]
    pub poll_base_ms: u64,
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,

    /// Hard limit for a single add/remove round trip; 0 disables the limit.
    #[serde(default = "default_mutation_timeout_ms")]
    pub mutation_timeout_ms: u64,

    #[serde(default = "default_remove_batch_size")]
    pub remove_batch_size: usize,

    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: i64,

    /// Label stored as `added_by` on optimistic entries.
    #[serde(default)]
    pub added_by: Option<String>,
}

fn default_redirect_uri() -> String { "http://127.0.0.1:8888/callback".into() }
fn default_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_db_path() -> PathBuf { "/var/lib/playlist-sync/playlist-sync.db".into() }
fn default_log_dir() -> PathBuf { "/var/log/playlist-sync".into() }
fn default_poll_base_ms() -> u64 { 2_000 }
fn default_poll_max_ms() -> u64 { 30_000 }
fn default_verify_delay_ms() -> u64 { 1_500 }
fn default_mutation_timeout_ms() -> u64 { 15_000 }
fn default_remove_batch_size() -> usize { 100 }
fn default_refresh_margin_secs() -> i64 { 300 }

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            api_base: default_api_base(),
            auth_base: default_auth_base(),
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            poll_base_ms: default_poll_base_ms(),
            poll_max_ms: default_poll_max_ms(),
            verify_delay_ms: default_verify_delay_ms(),
            mutation_timeout_ms: default_mutation_timeout_ms(),
            remove_batch_size: default_remove_batch_size(),
            refresh_margin_secs: default_refresh_margin_secs(),
            added_by: None,
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_base_ms == 0 {
            anyhow::bail!("poll_base_ms must be greater than zero");
        }
        if self.poll_max_ms < self.poll_base_ms {
            anyhow::bail!(
                "poll_max_ms ({}) must not be smaller than poll_base_ms ({})",
                self.poll_max_ms,
                self.poll_base_ms
            );
        }
        if self.remove_batch_size == 0 {
            anyhow::bail!("remove_batch_size must be greater than zero");
        }
        if self.refresh_margin_secs < 0 {
            anyhow::bail!("refresh_margin_secs must not be negative");
        }
        Ok(())
    }

    pub fn poll_base(&self) -> Duration {
        Duration::from_millis(self.poll_base_ms)
    }

    pub fn poll_max(&self) -> Duration {
        Duration::from_millis(self.poll_max_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn mutation_timeout(&self) -> Option<Duration> {
        if self.mutation_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.mutation_timeout_ms))
        }
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_margin_secs)
    }
}
