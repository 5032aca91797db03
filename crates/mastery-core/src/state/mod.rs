//! Session state aggregate.

mod lookup;
mod store;

pub use lookup::{lookup_item, ItemLookup};
pub use store::AppStateStore;
