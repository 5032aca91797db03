//! Local durable key/value storage used for guest and offline state.

use crate::error::MasteryResult;

/// Key/value persistence on the device.
pub trait LocalDurableStore: Send + Sync {
    fn get(&self, key: &str) -> MasteryResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> MasteryResult<()>;

    fn remove(&self, key: &str) -> MasteryResult<()>;
}
