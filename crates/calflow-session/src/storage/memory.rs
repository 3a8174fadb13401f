//! In-memory key-value storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use calflow_core::{KeyValueStore, KvError};

/// In-memory storage implementation.
///
/// Useful for development and tests. Data is lost on restart. An optional
/// byte quota makes quota-pressure behavior reproducible.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    max_bytes: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_bytes: None,
        }
    }

    /// Create a store that rejects writes once keys plus values would
    /// exceed `max_bytes` in total.
    #[must_use]
    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_bytes: Some(max_bytes),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self
            .entries
            .read()
            .map_err(|e| KvError::Internal(e.to_string()))?
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| KvError::Internal(e.to_string()))?;

        if let Some(max) = self.max_bytes {
            // The replaced value's bytes are reclaimed before the check.
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if others + key.len() + value.len() > max {
                return Err(KvError::QuotaExceeded);
            }
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        self.entries
            .write()
            .map_err(|e| KvError::Internal(e.to_string()))?
            .remove(key);
        Ok(())
    }
}
