//! Optimistic playlist synchronizer.
//!
//! Local edits are applied and broadcast to subscribers before the remote
//! call is made; the remote result then either confirms or reverts them. A
//! background poll compares snapshot ids and pulls in changes made by other
//! clients, but never while local edits are still in flight.

use crate::api::PlaylistService;
use crate::config::Config;
use crate::db;
use crate::error::{ErrorKind, PlaylistError, Result};
use crate::models::{PendingKind, PlaylistEntry, PlaylistSnapshot, SelectedPlaylist, Track, TrackSyncState};
use crate::reconcile::{PollBackoff, ReconcileOutcome};
use crate::subscribers::{fan_out, Callback, Subscribers};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub poll_base: Duration,
    pub poll_max: Duration,
    /// Delay before the extra poll that follows a confirm with a new snapshot id.
    pub verify_delay: Duration,
    /// Remote mutations that take longer than this are reverted.
    pub mutation_timeout: Option<Duration>,
    pub added_by: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_base: Duration::from_secs(2),
            poll_max: Duration::from_secs(30),
            verify_delay: Duration::from_millis(1500),
            mutation_timeout: Some(Duration::from_secs(15)),
            added_by: None,
        }
    }
}

impl SyncOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            poll_base: cfg.poll_base(),
            poll_max: cfg.poll_max(),
            verify_delay: cfg.verify_delay(),
            mutation_timeout: cfg.mutation_timeout(),
            added_by: cfg.added_by.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed { adopted_snapshot: bool },
    /// Nothing was pending for the track (already confirmed, reverted, or torn down).
    NotPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    Reverted,
    NotPending,
}

#[derive(Debug, Clone, Copy)]
struct PendingOp {
    kind: PendingKind,
    started_at: Instant,
}

/// In-flight operations per track id, oldest first. A track can have an add
/// and a remove in flight at the same time.
type PendingOps = HashMap<String, Vec<PendingOp>>;

fn push_op(pending: &mut PendingOps, track_id: &str, kind: PendingKind, started_at: Instant) {
    pending
        .entry(track_id.to_string())
        .or_default()
        .push(PendingOp { kind, started_at });
}

/// Remove the oldest op for `track_id`, or the oldest of `kind` when given.
fn take_op(pending: &mut PendingOps, track_id: &str, kind: Option<PendingKind>) -> Option<PendingOp> {
    let ops = pending.get_mut(track_id)?;
    let pos = match kind {
        Some(k) => ops.iter().position(|op| op.kind == k)?,
        None if ops.is_empty() => return None,
        None => 0,
    };
    let op = ops.remove(pos);
    if ops.is_empty() {
        pending.remove(track_id);
    }
    Some(op)
}

fn op_count(pending: &PendingOps) -> usize {
    pending.values().map(Vec::len).sum()
}

struct State {
    playlist_id: Option<String>,
    snapshot_id: Option<String>,
    entries: Vec<PlaylistEntry>,
    pending: PendingOps,
    subscribers: Subscribers,
    backoff: PollBackoff,
    /// Set by a revert or by a confirm that adopts a new snapshot id: local
    /// content may lag the remote even if the snapshot ids agree, so the next
    /// quiet tick re-fetches anyway.
    stale: bool,
    /// Bumped by `set_tracks` and `teardown`; results of polls started
    /// under an older generation are dropped.
    generation: u64,
    poll_task: Option<JoinHandle<()>>,
    verify_task: Option<JoinHandle<()>>,
}

struct Inner {
    service: Arc<dyn PlaylistService>,
    options: SyncOptions,
    state: Mutex<State>,
}

/// Handle to the synchronizer for one playlist context. Cloning is cheap and
/// every clone drives the same state.
#[derive(Clone)]
pub struct PlaylistSynchronizer {
    inner: Arc<Inner>,
}

/// Returned by `subscribe`; call `unsubscribe` to stop receiving updates.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.state).subscribers.remove(self.id);
        }
    }
}

fn lock(m: &Mutex<State>) -> MutexGuard<'_, State> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl PlaylistSynchronizer {
    pub fn new(service: Arc<dyn PlaylistService>, options: SyncOptions) -> Self {
        let backoff = PollBackoff::new(options.poll_base, options.poll_max);
        Self {
            inner: Arc::new(Inner {
                service,
                options,
                state: Mutex::new(State {
                    playlist_id: None,
                    snapshot_id: None,
                    entries: Vec::new(),
                    pending: HashMap::new(),
                    subscribers: Subscribers::default(),
                    backoff,
                    stale: false,
                    generation: 0,
                    poll_task: None,
                    verify_task: None,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner.state)
    }

    // ---- queries -------------------------------------------------------

    pub fn tracks(&self) -> Vec<PlaylistEntry> {
        self.state().entries.clone()
    }

    /// Copy of the current list and snapshot id; capture this before a
    /// mutation to be able to `revert` to it.
    pub fn snapshot(&self) -> PlaylistSnapshot {
        let st = self.state();
        PlaylistSnapshot {
            entries: st.entries.clone(),
            snapshot_id: st.snapshot_id.clone(),
        }
    }

    pub fn snapshot_id(&self) -> Option<String> {
        self.state().snapshot_id.clone()
    }

    pub fn playlist_id(&self) -> Option<String> {
        self.state().playlist_id.clone()
    }

    pub fn state_of(&self, track_id: &str) -> TrackSyncState {
        self.state()
            .pending
            .get(track_id)
            .and_then(|ops| ops.last())
            .map(|op| op.kind)
            .into()
    }

    /// Number of in-flight operations across all tracks.
    pub fn pending_count(&self) -> usize {
        op_count(&self.state().pending)
    }

    pub fn current_poll_delay(&self) -> Duration {
        self.state().backoff.current()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    // ---- primitives ----------------------------------------------------

    /// Seed or replace the local state and restart the reconciliation loop.
    pub fn set_tracks(&self, entries: Vec<PlaylistEntry>, playlist_id: &str, snapshot_id: &str) {
        let (callbacks, list) = {
            let mut st = self.state();
            if st.playlist_id.as_deref() != Some(playlist_id) && !st.pending.is_empty() {
                debug!("switching playlist; dropping {} pending operation(s)", op_count(&st.pending));
                st.pending.clear();
            }
            st.playlist_id = Some(playlist_id.to_string());
            st.snapshot_id = Some(snapshot_id.to_string());
            st.entries = entries;
            st.stale = false;
            st.generation += 1;
            st.backoff.reset();
            if let Some(h) = st.verify_task.take() {
                h.abort();
            }
            if let Some(h) = st.poll_task.take() {
                h.abort();
            }
            st.poll_task = self.spawn_poll_loop(st.backoff.current());
            info!(
                service = self.inner.service.name(),
                playlist_id,
                snapshot_id,
                tracks = st.entries.len(),
                "playlist state seeded"
            );
            (st.subscribers.callbacks(), st.entries.clone())
        };
        fan_out(&callbacks, &list);
    }

    /// Prepend a provisional entry for `track` and notify subscribers.
    pub fn optimistically_add(&self, track: Track) {
        let (callbacks, list) = {
            let mut st = self.state();
            let track_id = track.id.clone();
            st.entries.insert(
                0,
                PlaylistEntry {
                    track,
                    added_at: Utc::now(),
                    added_by: self.inner.options.added_by.clone(),
                },
            );
            push_op(&mut st.pending, &track_id, PendingKind::Add, Instant::now());
            debug!(track_id = %track_id, "optimistic add");
            (st.subscribers.callbacks(), st.entries.clone())
        };
        fan_out(&callbacks, &list);
    }

    pub fn optimistically_remove(&self, track_id: &str) {
        self.optimistically_bulk_remove(&[track_id.to_string()]);
    }

    /// Drop every entry whose id is in `track_ids` and mark each id pending.
    pub fn optimistically_bulk_remove(&self, track_ids: &[String]) {
        let (callbacks, list) = {
            let mut st = self.state();
            st.entries.retain(|e| !track_ids.iter().any(|id| id == e.track_id()));
            let now = Instant::now();
            for id in track_ids {
                push_op(&mut st.pending, id, PendingKind::Remove, now);
            }
            debug!(count = track_ids.len(), "optimistic remove");
            (st.subscribers.callbacks(), st.entries.clone())
        };
        fan_out(&callbacks, &list);
    }

    /// Mark the oldest in-flight operation for `track_id` as accepted by the remote.
    pub fn confirm(&self, track_id: &str, new_snapshot_id: Option<&str>) -> ConfirmOutcome {
        self.settle_confirm(track_id, None, new_snapshot_id)
    }

    /// Like `confirm`, but only settles an operation of `kind`.
    pub fn confirm_kind(
        &self,
        track_id: &str,
        kind: PendingKind,
        new_snapshot_id: Option<&str>,
    ) -> ConfirmOutcome {
        self.settle_confirm(track_id, Some(kind), new_snapshot_id)
    }

    fn settle_confirm(
        &self,
        track_id: &str,
        kind: Option<PendingKind>,
        new_snapshot_id: Option<&str>,
    ) -> ConfirmOutcome {
        let adopted = {
            let mut st = self.state();
            let Some(op) = take_op(&mut st.pending, track_id, kind) else {
                debug!(track_id, "confirm with no pending operation ignored");
                return ConfirmOutcome::NotPending;
            };
            debug!(
                track_id,
                kind = ?op.kind,
                elapsed_ms = op.started_at.elapsed().as_millis() as u64,
                "operation confirmed"
            );
            match new_snapshot_id {
                Some(s) if st.snapshot_id.as_deref() != Some(s) => {
                    st.snapshot_id = Some(s.to_string());
                    // Content behind the adopted id is unknown until fetched.
                    st.stale = true;
                    true
                }
                _ => false,
            }
        };
        if adopted {
            self.schedule_verification();
        }
        ConfirmOutcome::Confirmed {
            adopted_snapshot: adopted,
        }
    }

    /// Undo the oldest in-flight operation for `track_id` by restoring `before`.
    pub fn revert(&self, track_id: &str, before: &PlaylistSnapshot) -> RevertOutcome {
        self.revert_many(&[track_id.to_string()], before)
    }

    /// Revert a bulk operation: settle the oldest op of every id and restore
    /// `before` once.
    pub fn revert_many(&self, track_ids: &[String], before: &PlaylistSnapshot) -> RevertOutcome {
        self.settle_revert(track_ids, None, before)
    }

    /// Like `revert_many`, but only settles operations of `kind`.
    pub fn revert_kind(
        &self,
        track_ids: &[String],
        kind: PendingKind,
        before: &PlaylistSnapshot,
    ) -> RevertOutcome {
        self.settle_revert(track_ids, Some(kind), before)
    }

    fn settle_revert(
        &self,
        track_ids: &[String],
        kind: Option<PendingKind>,
        before: &PlaylistSnapshot,
    ) -> RevertOutcome {
        let (callbacks, list) = {
            let mut st = self.state();
            let mut cleared = 0;
            for id in track_ids {
                if take_op(&mut st.pending, id, kind).is_some() {
                    cleared += 1;
                }
            }
            if cleared == 0 {
                debug!(count = track_ids.len(), "revert with no pending operation ignored");
                return RevertOutcome::NotPending;
            }
            st.entries = before.entries.clone();
            st.stale = true;
            info!(count = cleared, "optimistic operation reverted");
            (st.subscribers.callbacks(), st.entries.clone())
        };
        fan_out(&callbacks, &list);
        self.schedule_verification();
        RevertOutcome::Reverted
    }

    /// Register a change listener. It is called right away with the current
    /// list when that list is non-empty.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[PlaylistEntry]) + Send + Sync + 'static,
    {
        let cb: Callback = Arc::new(callback);
        let (id, initial) = {
            let mut st = self.state();
            let id = st.subscribers.add(cb.clone());
            let initial = if st.entries.is_empty() {
                None
            } else {
                Some(st.entries.clone())
            };
            (id, initial)
        };
        if let Some(list) = initial {
            fan_out(&[cb], &list);
        }
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Stop polling and forget all state. Late confirm/revert calls become no-ops.
    pub fn teardown(&self) {
        let mut st = self.state();
        if let Some(h) = st.poll_task.take() {
            h.abort();
        }
        if let Some(h) = st.verify_task.take() {
            h.abort();
        }
        st.subscribers.clear();
        st.pending.clear();
        st.entries.clear();
        st.playlist_id = None;
        st.snapshot_id = None;
        st.stale = false;
        st.generation += 1;
        st.backoff.reset();
        info!("playlist context torn down");
    }

    // ---- reconciliation ------------------------------------------------

    /// One reconciliation tick. Errors are folded into `ReconcileOutcome::Failed`.
    pub async fn reconcile_once(&self) -> ReconcileOutcome {
        let (playlist_id, held, stale, generation) = {
            let st = self.state();
            match &st.playlist_id {
                Some(p) => (p.clone(), st.snapshot_id.clone(), st.stale, st.generation),
                None => return ReconcileOutcome::Idle,
            }
        };

        let remote = match self.inner.service.fetch_snapshot_id(&playlist_id).await {
            Ok(s) => s,
            Err(e) => {
                debug!("snapshot poll failed: {}", e);
                return ReconcileOutcome::Failed(e);
            }
        };
        if held.as_deref() == Some(remote.as_str()) && !stale {
            return ReconcileOutcome::Unchanged;
        }

        let pending = op_count(&self.state().pending);
        if pending > 0 {
            debug!(remote_snapshot = %remote, pending, "remote changed; skipping adoption while edits are pending");
            return ReconcileOutcome::SkippedPending {
                remote_snapshot_id: remote,
                pending,
            };
        }

        let (entries, snapshot_id) = match self.inner.service.fetch_playlist(&playlist_id).await {
            Ok(v) => v,
            Err(e) => {
                debug!("playlist fetch failed: {}", e);
                return ReconcileOutcome::Failed(e);
            }
        };

        let (callbacks, list) = {
            let mut st = self.state();
            if st.generation != generation {
                debug!("playlist context changed during poll; dropping result");
                return ReconcileOutcome::Idle;
            }
            // An edit may have started while the fetch was in flight.
            if !st.pending.is_empty() {
                let pending = op_count(&st.pending);
                debug!(pending, "edit started during fetch; skipping adoption");
                return ReconcileOutcome::SkippedPending {
                    remote_snapshot_id: snapshot_id,
                    pending,
                };
            }
            info!(
                from = ?st.snapshot_id,
                to = %snapshot_id,
                tracks = entries.len(),
                "adopting remote playlist state"
            );
            st.entries = entries;
            st.snapshot_id = Some(snapshot_id.clone());
            st.stale = false;
            (st.subscribers.callbacks(), st.entries.clone())
        };
        fan_out(&callbacks, &list);
        ReconcileOutcome::Adopted { snapshot_id }
    }

    fn record_outcome(&self, outcome: &ReconcileOutcome) -> Duration {
        self.state().backoff.next_delay(outcome)
    }

    fn spawn_poll_loop(&self, initial: Duration) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!("no async runtime available; reconciliation loop not started");
                return None;
            }
        };
        let weak = Arc::downgrade(&self.inner);
        Some(handle.spawn(async move {
            let mut delay = initial;
            loop {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let sync = PlaylistSynchronizer { inner };
                let outcome = sync.reconcile_once().await;
                delay = sync.record_outcome(&outcome);
                debug!(?outcome, next_ms = delay.as_millis() as u64, "reconcile tick");
            }
        }))
    }

    fn schedule_verification(&self) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => return,
        };
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.options.verify_delay;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let sync = PlaylistSynchronizer { inner };
                let outcome = sync.reconcile_once().await;
                sync.record_outcome(&outcome);
                debug!(?outcome, "verification poll");
            }
        });
        let mut st = self.state();
        if let Some(old) = st.verify_task.replace(task) {
            old.abort();
        }
    }

    // ---- end-to-end flows ----------------------------------------------

    fn require_playlist(&self) -> Result<String> {
        self.playlist_id().ok_or_else(|| {
            PlaylistError::new(ErrorKind::NotConnected, "no playlist loaded")
        })
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.inner.options.mutation_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(r) => r,
                Err(_) => Err(PlaylistError::new(
                    ErrorKind::Timeout,
                    format!("remote call did not finish within {:?}", limit),
                )),
            },
            None => fut.await,
        }
    }

    /// Fetch `playlist_id` from the remote and seed local state with it.
    pub async fn load(&self, playlist_id: &str) -> Result<()> {
        let (entries, snapshot_id) = self.inner.service.fetch_playlist(playlist_id).await?;
        self.set_tracks(entries, playlist_id, &snapshot_id);
        Ok(())
    }

    /// Load whichever playlist the selected-playlist pointer names.
    pub async fn load_selected(&self, db_path: &Path) -> Result<SelectedPlaylist> {
        let db_path = db_path.to_path_buf();
        let selected = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<SelectedPlaylist>> {
            let conn = db::open_or_create(&db_path)?;
            db::load_selected_playlist(&conn)
        })
        .await
        .map_err(|e| PlaylistError::new(ErrorKind::Storage, e.to_string()))?
        .map_err(|e| PlaylistError::new(ErrorKind::Storage, format!("{:#}", e)))?
        .ok_or_else(|| PlaylistError::new(ErrorKind::NotConnected, "no playlist selected"))?;
        self.load(&selected.playlist_id).await?;
        Ok(selected)
    }

    /// Optimistically add `track`, then push it to the remote.
    /// Returns the new snapshot id, or the remote error after reverting.
    pub async fn add(&self, track: Track) -> Result<String> {
        let playlist_id = self.require_playlist()?;
        let before = self.snapshot();
        let track_id = track.id.clone();
        let uri = track.uri.clone();
        self.optimistically_add(track);

        let service = self.inner.service.clone();
        match self.guarded(service.add_track(&playlist_id, &uri)).await {
            Ok(snapshot_id) => {
                self.confirm_kind(&track_id, PendingKind::Add, Some(&snapshot_id));
                Ok(snapshot_id)
            }
            Err(e) => {
                warn!(track_id = %track_id, service = service.name(), "add failed, reverting: {}", e);
                self.revert_kind(&[track_id.clone()], PendingKind::Add, &before);
                Err(e)
            }
        }
    }

    /// Resolve a track id to a full track, then `add` it.
    pub async fn add_by_id(&self, track_id: &str) -> Result<String> {
        let track = self.inner.service.fetch_track(track_id).await?;
        self.add(track).await
    }

    pub async fn remove(&self, track_id: &str) -> Result<String> {
        self.bulk_remove(&[track_id.to_string()]).await
    }

    /// Optimistically remove `track_ids`, then remove them remotely
    /// (batched by the adapter).
    pub async fn bulk_remove(&self, track_ids: &[String]) -> Result<String> {
        let playlist_id = self.require_playlist()?;
        let before = self.snapshot();

        let mut ids: Vec<String> = Vec::new();
        let mut uris: Vec<String> = Vec::new();
        for e in &before.entries {
            let id = e.track_id();
            if track_ids.iter().any(|t| t == id) && !ids.iter().any(|t| t == id) {
                ids.push(id.to_string());
                uris.push(e.track.uri.clone());
            }
        }
        if ids.is_empty() {
            return Err(PlaylistError::new(
                ErrorKind::NotFound,
                "none of the requested tracks are in the playlist",
            ));
        }
        self.optimistically_bulk_remove(&ids);

        let service = self.inner.service.clone();
        match self.guarded(service.remove_tracks(&playlist_id, &uris)).await {
            Ok(snapshot_id) => {
                for id in &ids {
                    self.confirm_kind(id, PendingKind::Remove, Some(&snapshot_id));
                }
                Ok(snapshot_id)
            }
            Err(e) => {
                warn!(count = ids.len(), service = service.name(), "remove failed, reverting: {}", e);
                self.revert_kind(&ids, PendingKind::Remove, &before);
                Err(e)
            }
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Track>> {
        self.inner.service.search_tracks(query).await
    }
}
