//! mastery-core - Core library for mastery.
//!
//! This crate keeps a learner's state (course library, progress, goals and
//! trash) in sync between the device and a remote document store, and
//! schedules spaced-repetition reviews with SM-2.
//!
//! # Example
//!
//! ```ignore
//! use mastery_core::{AppStatePatch, MasteryConfig, SessionCollaborators, SessionRuntime};
//!
//! let collaborators = SessionCollaborators::new(remote, local, network);
//! let mut session = SessionRuntime::new(MasteryConfig::from_env(), collaborators);
//! session.start(Some(uid)).await?;
//!
//! // Apply an edit; it is visible immediately and persisted in the background
//! session
//!     .coordinator()
//!     .save_data(AppStatePatch::new().with_courses(courses))
//!     .await?;
//!
//! // Record a review outcome
//! let item = session.record_review("question-1", "course-1", true, true).await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod portability;
pub mod runtime;
pub mod srs;
pub mod state;
pub mod stores;
pub mod sync;
pub mod traits;
pub mod trash;
pub mod types;

// Re-export commonly used types
pub use config::{EchoDetection, MasteryConfig, RetryPolicy, SrsConfig, SyncConfig, TrashConfig};
pub use error::{ErrorCode, MasteryError, MasteryResult, RemoteErrorCode};
pub use events::{EventBus, EventSubscriber, SyncEvent};
pub use runtime::{SessionCollaborators, SessionRuntime};
pub use srs::{ReviewRecorder, SrsScheduler};
pub use state::{AppStateStore, ItemLookup};
pub use stores::{InMemoryRemoteStore, MemoryLocalStore, SqliteLocalStore};
pub use sync::{ChangeDecision, LoadSource, RemoteChangeListener, SaveOutcome, SyncCoordinator};
pub use traits::{
    Clock, DocPath, Document, LocalDurableStore, ManualClock, Marketplace, NetworkMonitor,
    NetworkStatus, RemoteChange, RemoteStore, SystemClock,
};
pub use trash::{RestoreReport, SweepReport, TrashManager, TrashSweeper};
pub use types::{
    AppState, AppStatePatch, Course, Goals, OriginPath, Question, Quiz, ReviewItem,
    ReviewSchedule, TrashEntity, TrashItem, TrashKind, UserStats,
};
