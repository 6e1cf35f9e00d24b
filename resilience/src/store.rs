//! Persistent store seam.
//!
//! The engine persists queues, reports and statistics through this trait;
//! the real backing lives outside the crate (the extension's storage
//! layer). The store is eventually consistent and fallible — the engine
//! treats every failure as non-fatal and keeps running on in-memory state.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

/// External key-value store: `get` a set of keys, `set` a batch of entries.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the requested keys. Missing keys are simply absent from the
    /// returned map.
    async fn get(&self, keys: &[&str]) -> anyhow::Result<HashMap<String, Value>>;

    /// Write a batch of entries.
    async fn set(&self, entries: HashMap<String, Value>) -> anyhow::Result<()>;
}

/// In-memory store used as the default backing and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> anyhow::Result<HashMap<String, Value>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(*key).map(|v| ((*key).to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, new_entries: HashMap<String, Value>) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.extend(new_entries);
        Ok(())
    }
}
