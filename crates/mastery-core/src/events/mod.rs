//! Sync notices
//!
//! - `SyncEvent`: what happened (saved, offline, retry, reload, trash warnings)
//! - `EventBus`: broadcast fan-out to UI subscribers

mod bus;
mod event;

pub use bus::{EventBus, EventSubscriber};
pub use event::SyncEvent;
