//! Notices emitted by the sync engine and the trash lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync and trash notices, intended for user-facing status display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// State written to the remote store.
    Saved { at: DateTime<Utc> },
    /// Guest state written to the device.
    SavedLocally,
    /// Device is offline; state was backed up locally.
    Offline { message: String },
    /// A transient remote failure will be retried.
    RetryScheduled { attempt: usize, delay_ms: u64 },
    /// A save failed for good. The state stays dirty.
    SaveFailed { message: String, code: String },
    /// State replaced by a remote change from another device.
    Reloaded { written_at: DateTime<Utc> },
    /// A remote change was recognized as our own write.
    EchoIgnored,
    /// Restoring from trash needed a fallback.
    TrashWarning { message: String },
    /// Expired trash items were purged.
    TrashExpired { count: usize },
}

impl SyncEvent {
    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Saved { .. } => "sync.saved",
            Self::SavedLocally => "sync.saved_locally",
            Self::Offline { .. } => "sync.offline",
            Self::RetryScheduled { .. } => "sync.retry_scheduled",
            Self::SaveFailed { .. } => "sync.save_failed",
            Self::Reloaded { .. } => "sync.reloaded",
            Self::EchoIgnored => "sync.echo_ignored",
            Self::TrashWarning { .. } => "trash.warning",
            Self::TrashExpired { .. } => "trash.expired",
        }
    }

    /// Whether the notice reports something the user should see.
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            Self::Offline { .. } | Self::SaveFailed { .. } | Self::TrashWarning { .. }
        )
    }
}
