//! Trash lifecycle: soft delete, restore, permanent delete and expiry.

mod manager;
mod sweeper;

pub use manager::{RestoreReport, SweepReport, TrashManager};
pub use sweeper::TrashSweeper;
