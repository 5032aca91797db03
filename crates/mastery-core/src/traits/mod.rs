//! Collaborator traits for mastery.

mod clock;
mod local_store;
mod marketplace;
mod network;
mod remote_store;

pub use clock::*;
pub use local_store::*;
pub use marketplace::*;
pub use network::*;
pub use remote_store::*;
