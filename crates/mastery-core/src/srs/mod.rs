//! Spaced-repetition scheduling.
//!
//! - `SrsScheduler`: pure SM-2 next-review computation
//! - `ReviewRecorder`: review record persistence in the remote store

mod recorder;
mod scheduler;

pub use recorder::ReviewRecorder;
pub use scheduler::{ReviewBranch, SrsScheduler, QUALITY_CORRECT, QUALITY_INCORRECT};
