//! Collaborator implementations.
//!
//! - `InMemoryRemoteStore`: in-process remote document store
//! - `SqliteLocalStore`: durable key/value store on the device
//! - `MemoryLocalStore`: volatile key/value store

mod memory_local;
mod memory_remote;
mod sqlite_local;

pub use memory_local::MemoryLocalStore;
pub use memory_remote::InMemoryRemoteStore;
pub use sqlite_local::SqliteLocalStore;
