//! Per-instance context data store
//!
//! Key/value JSON data pushed by the host application. Live values are
//! offered to the evaluation engine under the `data` context key. Entries
//! carry an optional TTL and expire lazily, like the decision log.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::config::DataStoreConfig;

/// Data store errors
#[derive(Debug, Error)]
pub enum DataError {
    #[error("data key must not be empty")]
    InvalidKey,

    #[error("data entry of {size} bytes exceeds the {max} byte limit")]
    ValueTooLarge { size: usize, max: usize },

    #[error("data store is full ({max} entries)")]
    StorageLimitExceeded { max: usize },

    #[error("requested TTL {requested:?} exceeds the maximum of {max:?}")]
    TtlExceeded { requested: Duration, max: Duration },

    #[error("data entry could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One stored value with its metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,

    /// Wall-clock expiry, `None` when the entry never expires
    pub expires_at: Option<DateTime<Utc>>,

    /// Number of reads through [`DataStore::get`] or [`DataStore::get_entry`]
    pub access_count: u64,

    #[serde(skip)]
    deadline: Option<Instant>,
}

impl DataEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }
}

/// Counters reported by [`DataStore::stats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataStoreStats {
    pub entry_count: usize,
    pub max_entries: usize,
    pub max_entry_size: usize,
    pub total_size_bytes: usize,
}

/// TTL-bounded key/value store owned by one instance
#[derive(Debug)]
pub struct DataStore {
    config: DataStoreConfig,
    entries: Mutex<HashMap<String, DataEntry>>,
}

impl DataStore {
    pub fn new(config: DataStoreConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DataStoreConfig {
        &self.config
    }

    /// Insert or replace `key`. Without `ttl` the configured default applies.
    pub fn push(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), DataError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        self.insert(&mut entries, key, value, ttl, now)
    }

    fn insert(
        &self,
        entries: &mut HashMap<String, DataEntry>,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        now: Instant,
    ) -> Result<(), DataError> {
        if key.trim().is_empty() {
            return Err(DataError::InvalidKey);
        }
        let ttl = self.effective_ttl(ttl)?;

        let created_at = Utc::now();
        let entry = DataEntry {
            key: key.to_string(),
            value,
            created_at,
            expires_at: ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .and_then(|ttl| created_at.checked_add_signed(ttl)),
            access_count: 0,
            deadline: ttl.and_then(|ttl| now.checked_add(ttl)),
        };

        let size = serde_json::to_vec(&entry)?.len();
        if self.config.max_entry_size > 0 && size > self.config.max_entry_size {
            return Err(DataError::ValueTooLarge {
                size,
                max: self.config.max_entry_size,
            });
        }

        evict_expired(entries, now);
        if !entries.contains_key(key) && entries.len() >= self.config.max_entries {
            return Err(DataError::StorageLimitExceeded {
                max: self.config.max_entries,
            });
        }

        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn effective_ttl(&self, requested: Option<Duration>) -> Result<Option<Duration>, DataError> {
        match (requested, self.config.max_ttl) {
            (Some(requested), Some(max)) if requested > max => {
                Err(DataError::TtlExceeded { requested, max })
            }
            (Some(requested), _) => Ok(Some(requested)),
            (None, Some(max)) => Ok(Some(self.config.default_ttl.unwrap_or(max).min(max))),
            (None, None) => Ok(self.config.default_ttl),
        }
    }

    /// Lock the store and drop whatever has expired by now
    fn live(&self) -> MutexGuard<'_, HashMap<String, DataEntry>> {
        let mut entries = self.entries.lock();
        evict_expired(&mut entries, Instant::now());
        entries
    }

    /// Live value of `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Live entry of `key` with its metadata
    pub fn get_entry(&self, key: &str) -> Option<DataEntry> {
        let mut entries = self.live();
        let entry = entries.get_mut(key)?;
        entry.access_count += 1;
        Some(entry.clone())
    }

    /// Remove `key`; false if it was absent or already expired
    pub fn remove(&self, key: &str) -> bool {
        self.live().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        debug!("Cleared {} data entries", entries.len());
        entries.clear();
    }

    /// Every live entry, sorted by key
    pub fn list(&self) -> Vec<DataEntry> {
        let mut list: Vec<DataEntry> = self.live().values().cloned().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        list
    }

    /// Live values keyed by name, as handed to the evaluation engine
    pub fn values(&self) -> Map<String, Value> {
        self.live()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DataStoreStats {
        let entries = self.live();
        let total_size_bytes = entries
            .values()
            .map(|entry| serde_json::to_vec(entry).map(|bytes| bytes.len()).unwrap_or(0))
            .sum();

        DataStoreStats {
            entry_count: entries.len(),
            max_entries: self.config.max_entries,
            max_entry_size: self.config.max_entry_size,
            total_size_bytes,
        }
    }
}

fn evict_expired(entries: &mut HashMap<String, DataEntry>, now: Instant) {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    let evicted = before - entries.len();
    if evicted > 0 {
        debug!("Evicted {} expired data entries", evicted);
    }
}
