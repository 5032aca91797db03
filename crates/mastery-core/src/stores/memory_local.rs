//! In-memory local durable store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::MasteryResult;
use crate::traits::LocalDurableStore;

/// Local store that forgets everything on drop. For tests and previews.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl LocalDurableStore for MemoryLocalStore {
    fn get(&self, key: &str) -> MasteryResult<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> MasteryResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> MasteryResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
