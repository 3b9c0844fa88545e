//! Core library for playlist-sync-engine
pub mod api;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod subscribers;
pub mod synchronizer;

pub use error::{ErrorKind, PlaylistError, RecoveryAction};
pub use synchronizer::{ConfirmOutcome, PlaylistSynchronizer, RevertOutcome, SyncOptions};
