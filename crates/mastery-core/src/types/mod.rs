//! Core types for mastery.

mod app_state;
mod course;
mod review;
mod trash;

pub use app_state::*;
pub use course::*;
pub use review::*;
pub use trash::*;
