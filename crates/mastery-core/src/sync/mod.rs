//! Synchronization of the state aggregate with the remote store.
//!
//! - `SyncCoordinator`: coalesced saves, offline backup, echo-aware reloads
//! - `RemoteChangeListener`: feeds remote notifications to the coordinator
//! - `strip_nulls` / `load_remote_state`: payload and document layout helpers

mod coordinator;
mod layout;
mod listener;
mod sanitize;
mod state;

pub use coordinator::{ChangeDecision, LoadSource, PendingBackup, SaveOutcome, SyncCoordinator};
pub use layout::{build_payload, load_remote_state, RemoteSnapshot};
pub use listener::RemoteChangeListener;
pub use sanitize::strip_nulls;
pub use state::SyncState;
