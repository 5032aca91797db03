//! Per-session synchronization bookkeeping.

use serde_json::Value;
use std::collections::VecDeque;

use crate::config::EchoDetection;
use crate::traits::RemoteChange;
use crate::types::AppStatePatch;

/// Field carrying the id of the write that produced a document.
pub(crate) const WRITE_TOKEN_FIELD: &str = "writeToken";

/// Field carrying the client time of the write.
pub(crate) const UPDATED_AT_FIELD: &str = "updatedAt";

/// Synchronization state of the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    /// Signed-in user, `None` for a guest.
    pub uid: Option<String>,
    /// Local state has changes the remote store has not acknowledged.
    pub is_dirty: bool,
    /// Client time of the last acknowledged remote write (ms since epoch).
    pub last_saved_at: Option<i64>,
    /// Server time of the last remote change applied locally (ms since epoch).
    pub last_remote_seen_at: Option<i64>,
    /// A write or reload holds the save slot.
    pub is_saving: bool,
    /// Updates received while the slot was held, merged field-wise.
    pub pending_update: Option<AppStatePatch>,
    /// Payload of the last reload; a persist producing the same payload is skipped.
    pub(crate) reloaded_snapshot: Option<Value>,
    pub(crate) recent_tokens: VecDeque<String>,
}

impl SyncState {
    pub fn for_user(uid: Option<String>) -> Self {
        Self {
            uid,
            ..Default::default()
        }
    }

    /// Queue an update behind the write in flight.
    pub(crate) fn enqueue(&mut self, patch: AppStatePatch) {
        match self.pending_update.as_mut() {
            Some(pending) => pending.merge(patch),
            None => self.pending_update = Some(patch),
        }
    }

    pub(crate) fn remember_token(&mut self, token: String, capacity: usize) {
        self.recent_tokens.push_back(token);
        while self.recent_tokens.len() > capacity.max(1) {
            self.recent_tokens.pop_front();
        }
    }

    /// Whether a notification was caused by one of our own writes.
    pub(crate) fn is_echo(
        &self,
        change: &RemoteChange,
        detection: EchoDetection,
        window_ms: i64,
    ) -> bool {
        match detection {
            EchoDetection::TimeWindow => {
                let written = change.written_at.timestamp_millis();
                self.last_saved_at
                    .is_some_and(|saved| (written - saved).abs() < window_ms)
            }
            EchoDetection::WriteToken => change
                .data
                .as_ref()
                .and_then(|data| data.get(WRITE_TOKEN_FIELD))
                .and_then(Value::as_str)
                .is_some_and(|token| self.recent_tokens.iter().any(|t| t == token)),
        }
    }

    /// Whether a notification is no newer than what was already applied.
    pub(crate) fn is_stale(&self, change: &RemoteChange) -> bool {
        let written = change.written_at.timestamp_millis();
        self.last_remote_seen_at.is_some_and(|seen| written <= seen)
    }

    pub(crate) fn mark_seen(&mut self, written_ms: i64) {
        let seen = self.last_remote_seen_at.map_or(written_ms, |seen| seen.max(written_ms));
        self.last_remote_seen_at = Some(seen);
    }
}
