//! Save coalescing, persistence and remote-change reconciliation.
//!
//! The coordinator owns the single save slot of a session. Whoever holds it
//! (a save or a reload) is the only one talking to the remote store; updates
//! that arrive meanwhile are applied to the in-memory state at once and
//! merged into one pending update, which the slot holder writes before
//! releasing the slot.

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::layout::{build_payload, load_remote_state, stamp};
use super::state::SyncState;
use crate::config::SyncConfig;
use crate::error::{MasteryError, MasteryResult};
use crate::events::{EventBus, SyncEvent};
use crate::state::AppStateStore;
use crate::traits::{Clock, DocPath, LocalDurableStore, NetworkStatus, RemoteChange, RemoteStore};
use crate::types::{AppState, AppStatePatch};

const OFFLINE_MESSAGE: &str = "You're offline. Changes will sync when you're back online.";

/// Result of a [`SyncCoordinator::save_data`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Written to the remote store.
    Saved { at: DateTime<Utc> },
    /// Guest state written to the local store.
    SavedLocally,
    /// Device offline; a local backup was written instead.
    Offline,
    /// Another save is in flight and will write this update too.
    Queued,
    /// Nothing differed from the last reloaded remote state.
    Unchanged,
}

/// What [`SyncCoordinator::handle_remote_change`] did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    IgnoredEcho,
    IgnoredStale,
    IgnoredForeignPath,
    Reloaded,
    /// The root document no longer exists.
    Missing,
}

/// Where [`SyncCoordinator::load`] found the session's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    /// An offline backup of this user was restored and is being saved.
    Backup,
    Guest,
    /// Nothing stored yet.
    Empty,
}

/// Local copy of the state written while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBackup {
    pub uid: String,
    pub saved_at: i64,
    pub state: AppState,
}

/// Claim on the save slot.
///
/// Released by [`SyncCoordinator::drain_pending`]. A claim dropped before
/// that (the save or reload future was cancelled) frees the slot itself, so
/// later saves are not queued behind a write that will never finish.
struct SaveSlot<'a> {
    coordinator: &'a SyncCoordinator,
    released: bool,
}

impl<'a> SaveSlot<'a> {
    fn claimed(coordinator: &'a SyncCoordinator) -> Self {
        Self {
            coordinator,
            released: false,
        }
    }
}

impl Drop for SaveSlot<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        {
            let mut state = self.coordinator.lock();
            state.is_saving = false;
            // Queued updates are already in the store and the state stays
            // dirty, so the next save writes them.
            state.pending_update = None;
        }
        warn!("Save cancelled before finishing, releasing save slot");
        self.coordinator.idle.notify_waiters();
    }
}

/// Keeps the state aggregate in sync with the remote store.
pub struct SyncCoordinator {
    store: Arc<AppStateStore>,
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalDurableStore>,
    network: Arc<dyn NetworkStatus>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    config: SyncConfig,
    state: Mutex<SyncState>,
    idle: Notify,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<AppStateStore>,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalDurableStore>,
        network: Arc<dyn NetworkStatus>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            local,
            network,
            clock,
            events,
            config,
            state: Mutex::new(SyncState::default()),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &Arc<AppStateStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Copy of the current bookkeeping.
    pub fn sync_state(&self) -> SyncState {
        self.lock().clone()
    }

    pub fn uid(&self) -> Option<String> {
        self.lock().uid.clone()
    }

    pub fn is_saving(&self) -> bool {
        self.lock().is_saving
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().is_dirty
    }

    /// Switch the signed-in account. `None` means guest.
    ///
    /// Resets all bookkeeping. The state aggregate is left to the caller.
    pub fn set_user(&self, uid: Option<String>) {
        info!(uid = ?uid, "Sync user changed");
        *self.lock() = SyncState::for_user(uid);
        self.idle.notify_waiters();
    }

    /// Wait until no save or reload holds the slot.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.lock().is_saving {
                return;
            }
            notified.await;
        }
    }

    /// Apply an update locally and persist it.
    ///
    /// Reads of the store reflect the update as soon as this is called. If a
    /// save is already in flight the update is queued and `Queued` returned
    /// without waiting; the in-flight save writes it before finishing.
    pub async fn save_data(&self, patch: AppStatePatch) -> MasteryResult<SaveOutcome> {
        let ((), outcome) = self.save_with(|_| Ok((patch, ()))).await?;
        outcome
    }

    /// Apply a change computed from the current state, then persist it.
    ///
    /// `change` runs under the coordinator lock: no other update lands
    /// between the state it reads and the patch it returns. If it fails,
    /// nothing is applied. Otherwise its value is returned together with
    /// the outcome of the save.
    pub async fn save_with<T>(
        &self,
        change: impl FnOnce(&AppState) -> MasteryResult<(AppStatePatch, T)>,
    ) -> MasteryResult<(T, MasteryResult<SaveOutcome>)> {
        let (value, slot) = {
            let mut state = self.lock();
            let (patch, value) = self.store.with(change)?;
            self.store.apply_update(patch.clone());
            state.is_dirty = true;
            if state.is_saving {
                debug!(fields = ?patch.field_names(), "Save in flight, queueing update");
                state.enqueue(patch);
                return Ok((value, Ok(SaveOutcome::Queued)));
            }
            state.is_saving = true;
            (value, SaveSlot::claimed(self))
        };

        let outcome = self.persist().await;
        Ok((value, self.drain_pending(slot, outcome).await))
    }

    /// Write queued updates until none remain, then release the slot.
    async fn drain_pending(
        &self,
        mut slot: SaveSlot<'_>,
        mut outcome: MasteryResult<SaveOutcome>,
    ) -> MasteryResult<SaveOutcome> {
        loop {
            {
                let mut state = self.lock();
                match state.pending_update.take() {
                    Some(next) => {
                        debug!(fields = ?next.field_names(), "Writing queued update");
                        // A reload may have replaced the state since the update was queued.
                        self.store.apply_update(next);
                    }
                    None => {
                        state.is_saving = false;
                        slot.released = true;
                        break;
                    }
                }
            }
            outcome = self.persist().await;
        }
        self.idle.notify_waiters();
        outcome
    }

    async fn persist(&self) -> MasteryResult<SaveOutcome> {
        let uid = self.lock().uid.clone();
        let result = match uid {
            None => self.persist_guest(),
            Some(uid) if !self.network.is_online() => self.persist_offline(&uid),
            Some(uid) => self.persist_remote(&uid).await,
        };
        result.map_err(|e| self.fail(e))
    }

    fn persist_guest(&self) -> MasteryResult<SaveOutcome> {
        let json = serde_json::to_string(&self.store.snapshot())?;
        self.local.set(&self.config.guest_data_key, &json)?;
        self.lock().is_dirty = false;
        debug!("Guest state saved locally");
        self.events.emit(SyncEvent::SavedLocally);
        Ok(SaveOutcome::SavedLocally)
    }

    fn persist_offline(&self, uid: &str) -> MasteryResult<SaveOutcome> {
        let backup = PendingBackup {
            uid: uid.to_string(),
            saved_at: self.clock.now_millis(),
            state: self.store.snapshot(),
        };
        self.local
            .set(&self.config.pending_backup_key, &serde_json::to_string(&backup)?)?;
        info!(uid, "Offline, state backed up locally");
        self.events.emit(SyncEvent::Offline {
            message: OFFLINE_MESSAGE.to_string(),
        });
        Ok(SaveOutcome::Offline)
    }

    async fn persist_remote(&self, uid: &str) -> MasteryResult<SaveOutcome> {
        let payload = build_payload(&self.store.snapshot())?;
        {
            let mut state = self.lock();
            if let Some(reloaded) = state.reloaded_snapshot.take() {
                if reloaded == payload {
                    state.is_dirty = state.pending_update.is_some();
                    debug!(uid, "State equals last reload, skipping write");
                    return Ok(SaveOutcome::Unchanged);
                }
            }
        }

        let now = self.clock.now();
        let token = uuid::Uuid::new_v4().to_string();
        let payload = stamp(payload, now, &token);
        self.lock()
            .remember_token(token, self.config.write_token_history);

        let root = DocPath::user_root(uid);
        let attempts = AtomicUsize::new(0);
        let write_once = || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            self.remote.set(&root, payload.clone(), true).await
        };

        let policy = &self.config.retry;
        let written = write_once
            .retry(
                ExponentialBuilder::default()
                    .with_max_times(policy.max_retries as usize)
                    .with_min_delay(policy.initial_delay())
                    .with_max_delay(policy.max_delay())
                    .with_factor(policy.multiplier),
            )
            .when(|e: &MasteryError| e.is_retryable())
            .notify(|err, dur| {
                let attempt = attempts.load(Ordering::SeqCst);
                warn!(uid, attempt, delay = ?dur, error = %err, "Save failed, retrying");
                self.events.emit(SyncEvent::RetryScheduled {
                    attempt,
                    delay_ms: dur.as_millis() as u64,
                });
            })
            .await;

        match written {
            Ok(server_time) => {
                {
                    let mut state = self.lock();
                    state.last_saved_at = Some(now.timestamp_millis());
                    state.is_dirty = state.pending_update.is_some();
                }
                self.clear_backup(uid);
                debug!(uid, %server_time, "State saved");
                self.events.emit(SyncEvent::Saved { at: now });
                Ok(SaveOutcome::Saved { at: now })
            }
            Err(e) => Err(MasteryError::save_failed(
                e,
                attempts.load(Ordering::SeqCst),
            )),
        }
    }

    /// Classify a failure, log it and tell the user.
    fn fail(&self, err: MasteryError) -> MasteryError {
        let err = match err {
            e @ MasteryError::SaveFailed { .. } => e,
            other => MasteryError::save_failed(other, 1),
        };
        error!(code = err.code().as_str(), error = %err, "Save failed");
        self.events.emit(SyncEvent::SaveFailed {
            message: err.user_message(),
            code: err.code().as_str().to_string(),
        });
        err
    }

    fn read_backup(&self) -> Option<PendingBackup> {
        let raw = match self.local.get(&self.config.pending_backup_key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Could not read offline backup");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(backup) => Some(backup),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable offline backup");
                None
            }
        }
    }

    fn clear_backup(&self, uid: &str) {
        if self.read_backup().is_some_and(|b| b.uid == uid) {
            if let Err(e) = self.local.remove(&self.config.pending_backup_key) {
                warn!(uid, error = %e, "Could not clear offline backup");
            }
        }
    }

    /// Whether an offline backup of this user is waiting to be synced.
    pub fn has_backup_for(&self, uid: &str) -> bool {
        self.read_backup().is_some_and(|b| b.uid == uid)
    }

    /// Load the session's initial state.
    ///
    /// Guests read the local guest data. Signed-in users get their offline
    /// backup if one is tagged with their uid (and it is saved right away),
    /// otherwise the remote state. Backups of other users are left alone.
    pub async fn load(&self) -> MasteryResult<LoadSource> {
        let Some(uid) = self.uid() else {
            let state = match self.local.get(&self.config.guest_data_key)? {
                Some(raw) => serde_json::from_str::<AppState>(&raw).unwrap_or_else(|e| {
                    warn!(error = %e, "Unreadable guest data, starting empty");
                    AppState::default()
                }),
                None => AppState::default(),
            };
            self.store.replace(state);
            return Ok(LoadSource::Guest);
        };

        if let Some(backup) = self.read_backup().filter(|b| b.uid == uid) {
            info!(uid, saved_at = backup.saved_at, "Restoring offline backup");
            self.store.replace(backup.state);
            self.save_data(AppStatePatch::new()).await?;
            return Ok(LoadSource::Backup);
        }

        match load_remote_state(&*self.remote, &uid).await? {
            Some(snapshot) => {
                self.store.replace(snapshot.state);
                self.lock().mark_seen(snapshot.written_at.timestamp_millis());
                debug!(uid, "Loaded remote state");
                Ok(LoadSource::Remote)
            }
            None => {
                self.store.clear();
                debug!(uid, "No remote state yet");
                Ok(LoadSource::Empty)
            }
        }
    }

    /// Sync local changes after the device came back online.
    ///
    /// Returns `None` when there was nothing to sync.
    pub async fn resume_online(&self) -> MasteryResult<Option<SaveOutcome>> {
        let (uid, dirty) = {
            let state = self.lock();
            (state.uid.clone(), state.is_dirty)
        };
        let Some(uid) = uid else {
            return Ok(None);
        };
        if !dirty && !self.has_backup_for(&uid) {
            return Ok(None);
        }
        info!(uid, "Back online, syncing local changes");
        self.save_data(AppStatePatch::new()).await.map(Some)
    }

    /// React to a notification about the user's root document.
    ///
    /// Waits for any save in flight. Our own writes and stale notifications
    /// are ignored; anything else replaces the local state with the remote
    /// one, after which saves queued during the reload are written.
    pub async fn handle_remote_change(&self, change: RemoteChange) -> MasteryResult<ChangeDecision> {
        let (uid, decision) = loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if !state.is_saving {
                    let decision = self.classify(&mut state, &change);
                    if decision == ChangeDecision::Reloaded {
                        state.is_saving = true;
                    }
                    break (state.uid.clone(), decision);
                }
            }
            notified.await;
        };

        match decision {
            ChangeDecision::IgnoredEcho => {
                debug!(path = %change.path, "Ignoring echo of our own write");
                self.events.emit(SyncEvent::EchoIgnored);
                return Ok(decision);
            }
            ChangeDecision::Reloaded => {}
            _ => {
                debug!(path = %change.path, ?decision, "Ignoring remote change");
                return Ok(decision);
            }
        }

        let slot = SaveSlot::claimed(self);
        let uid = uid.unwrap_or_default();
        let reloaded = self.reload(&uid, change.written_at).await;
        if let Err(e) = self.drain_pending(slot, Ok(SaveOutcome::Unchanged)).await {
            warn!(uid, error = %e, "Queued save after reload failed");
        }
        reloaded
    }

    fn classify(&self, state: &mut SyncState, change: &RemoteChange) -> ChangeDecision {
        let is_own_root = state
            .uid
            .as_deref()
            .is_some_and(|uid| change.path == DocPath::user_root(uid));
        if !is_own_root {
            return ChangeDecision::IgnoredForeignPath;
        }
        if state.is_echo(change, self.config.echo_detection, self.config.echo_window_ms) {
            state.mark_seen(change.written_at.timestamp_millis());
            return ChangeDecision::IgnoredEcho;
        }
        if state.is_stale(change) {
            return ChangeDecision::IgnoredStale;
        }
        ChangeDecision::Reloaded
    }

    async fn reload(&self, uid: &str, written_at: DateTime<Utc>) -> MasteryResult<ChangeDecision> {
        let Some(snapshot) = load_remote_state(&*self.remote, uid).await? else {
            warn!(uid, "Remote user document is gone");
            return Ok(ChangeDecision::Missing);
        };

        let payload = build_payload(&snapshot.state)?;
        {
            let mut state = self.lock();
            self.store.replace(snapshot.state);
            state.mark_seen(written_at.timestamp_millis());
            state.reloaded_snapshot = Some(payload);
            state.is_dirty = false;
        }
        info!(uid, %written_at, "Reloaded state from remote change");
        self.events.emit(SyncEvent::Reloaded { written_at });
        Ok(ChangeDecision::Reloaded)
    }
}
