//! Per-instance decision log
//!
//! Entries are kept in a primary index by id plus secondary indices by tag
//! and by request id. Every entry of a store shares the same TTL and its
//! expiry is stamped under the store lock, so entries expire in id order and
//! eviction only ever pops the oldest ids. Eviction is lazy: each operation
//! first drops whatever has expired.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::LogConfig;

/// Log entry identifier, unique and increasing within one store
pub type LogId = u64;

/// Data supplied when recording an entry
#[derive(Debug, Clone, Default)]
pub struct LogRecord {
    pub request_id: Option<String>,
    pub tags: BTreeSet<String>,
    pub payload: Vec<u8>,
}

impl LogRecord {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Immutable recorded entry
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Entry id
    pub id: LogId,

    /// Request id of the authorization that produced the entry
    pub request_id: Option<String>,

    /// Tags the entry is indexed under
    pub tags: BTreeSet<String>,

    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,

    /// Serialized decision record
    pub payload: Vec<u8>,

    /// `None` when the TTL reaches past the end of the clock
    expires_at: Option<Instant>,
}

impl LogEntry {
    /// JSON envelope handed to callers. JSON payloads are embedded as-is,
    /// anything else is base64 encoded.
    pub fn to_json(&self) -> Value {
        let payload = serde_json::from_slice::<Value>(&self.payload)
            .unwrap_or_else(|_| Value::String(STANDARD.encode(&self.payload)));

        json!({
            "id": self.id.to_string(),
            "request_id": self.request_id,
            "tags": self.tags,
            "created_at": self.created_at.to_rfc3339(),
            "payload": payload,
        })
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[derive(Debug)]
struct Inner {
    next_id: LogId,
    entries: BTreeMap<LogId, Arc<LogEntry>>,
    by_tag: HashMap<String, BTreeSet<LogId>>,
    by_request_id: HashMap<String, BTreeSet<LogId>>,
}

impl Inner {
    fn remove(&mut self, id: LogId) -> Option<Arc<LogEntry>> {
        let entry = self.entries.remove(&id)?;

        for tag in &entry.tags {
            unindex(&mut self.by_tag, tag, id);
        }
        if let Some(request_id) = &entry.request_id {
            unindex(&mut self.by_request_id, request_id, id);
        }
        Some(entry)
    }

    fn insert(&mut self, entry: Arc<LogEntry>) {
        for tag in &entry.tags {
            self.by_tag.entry(tag.clone()).or_default().insert(entry.id);
        }
        if let Some(request_id) = &entry.request_id {
            self.by_request_id
                .entry(request_id.clone())
                .or_default()
                .insert(entry.id);
        }
        self.entries.insert(entry.id, entry);
    }

    fn evict_expired(&mut self, now: Instant) {
        let mut evicted = 0usize;
        while let Some((&id, entry)) = self.entries.first_key_value() {
            let expired = matches!(entry.expires_at, Some(expires_at) if expires_at <= now);
            if !expired {
                break;
            }
            self.remove(id);
            evicted += 1;
        }
        if evicted > 0 {
            debug!("Evicted {} expired log entries", evicted);
        }
    }

    fn collect<'a>(&self, ids: impl IntoIterator<Item = &'a LogId>) -> Vec<Arc<LogEntry>> {
        ids.into_iter()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }
}

fn unindex(index: &mut HashMap<String, BTreeSet<LogId>>, key: &str, id: LogId) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

/// Indexed, TTL-bounded log owned by one instance
#[derive(Debug)]
pub struct LogStore {
    config: LogConfig,
    inner: Mutex<Inner>,
}

impl LogStore {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                next_id: 1,
                entries: BTreeMap::new(),
                by_tag: HashMap::new(),
                by_request_id: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Append an entry and return its id
    pub fn record(&self, record: LogRecord) -> LogId {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.append(&mut inner, record, now)
    }

    fn append(&self, inner: &mut Inner, record: LogRecord, now: Instant) -> LogId {
        inner.evict_expired(now);

        let id = inner.next_id;
        let entry = Arc::new(LogEntry {
            id,
            request_id: record.request_id,
            tags: record.tags,
            created_at: Utc::now(),
            payload: record.payload,
            // a TTL past the end of the clock never expires
            expires_at: now.checked_add(self.config.ttl),
        });

        inner.next_id += 1;
        inner.insert(entry);

        if let Some(max_items) = self.config.max_items {
            while inner.entries.len() > max_items {
                if let Some((&oldest, _)) = inner.entries.first_key_value() {
                    inner.remove(oldest);
                }
            }
        }

        id
    }

    /// Lock the store and drop whatever has expired by now
    fn live(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock();
        inner.evict_expired(Instant::now());
        inner
    }

    /// Ids of all live entries, ascending
    pub fn list_ids(&self) -> Vec<LogId> {
        self.live().entries.keys().copied().collect()
    }

    /// Live entry with this id
    pub fn get_by_id(&self, id: LogId) -> Option<Arc<LogEntry>> {
        self.live().entries.get(&id).cloned()
    }

    /// Live entries carrying `tag`, ascending by id
    pub fn get_by_tag(&self, tag: &str) -> Vec<Arc<LogEntry>> {
        let inner = self.live();
        match inner.by_tag.get(tag) {
            Some(ids) => inner.collect(ids),
            None => Vec::new(),
        }
    }

    /// Live entries produced by `request_id`, ascending by id
    pub fn get_by_request_id(&self, request_id: &str) -> Vec<Arc<LogEntry>> {
        let inner = self.live();
        match inner.by_request_id.get(request_id) {
            Some(ids) => inner.collect(ids),
            None => Vec::new(),
        }
    }

    /// Live entries produced by `request_id` that also carry `tag`
    pub fn get_by_request_id_and_tag(&self, request_id: &str, tag: &str) -> Vec<Arc<LogEntry>> {
        let inner = self.live();
        match (inner.by_request_id.get(request_id), inner.by_tag.get(tag)) {
            (Some(by_request), Some(by_tag)) => inner.collect(by_request.intersection(by_tag)),
            _ => Vec::new(),
        }
    }

    /// Remove and return every live entry, ascending by id
    pub fn drain_all(&self) -> Vec<Arc<LogEntry>> {
        let mut inner = self.live();
        inner.by_tag.clear();
        inner.by_request_id.clear();
        std::mem::take(&mut inner.entries).into_values().collect()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn store() -> LogStore {
        LogStore::new(LogConfig::default())
    }

    fn decision(request_id: &str, outcome: &str) -> LogRecord {
        LogRecord::new(json!({ "request_id": request_id, "decision": outcome == "allow" }).to_string().into_bytes())
            .with_request_id(request_id)
            .with_tag("authorize")
            .with_tag(outcome)
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let store = store();
        assert_eq!(store.record(decision("r1", "allow")), 1);
        assert_eq!(store.record(decision("r2", "deny")), 2);
        assert_eq!(store.list_ids(), vec![1, 2]);
    }

    #[test]
    fn test_secondary_indices() {
        let store = store();
        store.record(decision("r1", "allow"));
        store.record(decision("r1", "deny"));
        store.record(decision("r2", "allow"));

        let allowed: Vec<LogId> = store.get_by_tag("allow").iter().map(|e| e.id).collect();
        assert_eq!(allowed, vec![1, 3]);

        let r1: Vec<LogId> = store.get_by_request_id("r1").iter().map(|e| e.id).collect();
        assert_eq!(r1, vec![1, 2]);

        let r1_deny = store.get_by_request_id_and_tag("r1", "deny");
        assert_eq!(r1_deny.len(), 1);
        assert_eq!(r1_deny[0].id, 2);

        assert!(store.get_by_tag("missing").is_empty());
        assert!(store.get_by_request_id("missing").is_empty());
        assert!(store.get_by_request_id_and_tag("r2", "deny").is_empty());
    }

    #[test]
    fn test_get_by_id() {
        let store = store();
        let id = store.record(decision("r1", "allow"));
        let entry = store.get_by_id(id).unwrap();
        assert_eq!(entry.request_id.as_deref(), Some("r1"));
        assert!(entry.has_tag("authorize"));
        assert!(store.get_by_id(id + 1).is_none());
    }

    #[test]
    fn test_drain_is_destructive() {
        let store = store();
        store.record(decision("r1", "allow"));
        store.record(decision("r2", "deny"));

        let drained: Vec<LogId> = store.drain_all().iter().map(|e| e.id).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(store.drain_all().is_empty());
        assert!(store.get_by_tag("authorize").is_empty());
        assert!(store.is_empty());

        // ids keep increasing after a drain
        assert_eq!(store.record(decision("r3", "allow")), 3);
    }

    impl LogStore {
        fn record_at(&self, record: LogRecord, now: Instant) -> LogId {
            let mut inner = self.inner.lock();
            self.append(&mut inner, record, now)
        }

        fn live_ids_at(&self, now: Instant) -> Vec<LogId> {
            let mut inner = self.inner.lock();
            inner.evict_expired(now);
            inner.entries.keys().copied().collect()
        }
    }

    #[test]
    fn test_ttl_expiry_hides_entries_everywhere() {
        let store = LogStore::new(LogConfig {
            ttl: Duration::from_secs(10),
            max_items: None,
        });
        let start = Instant::now();
        store.record_at(decision("r1", "allow"), start);
        store.record_at(decision("r2", "allow"), start + Duration::from_secs(5));

        assert_eq!(store.live_ids_at(start + Duration::from_secs(12)), vec![2]);
        // the expired entry is gone from every index, not just hidden
        assert!(store.get_by_id(1).is_none());
        assert!(store.get_by_request_id("r1").is_empty());
        assert_eq!(store.get_by_tag("allow").len(), 1);

        assert!(store.live_ids_at(start + Duration::from_secs(30)).is_empty());
        assert!(store.drain_all().is_empty());
    }

    #[test]
    fn test_ttl_beyond_clock_never_expires() {
        let store = LogStore::new(LogConfig {
            ttl: Duration::from_secs(u64::MAX),
            max_items: None,
        });
        let start = Instant::now();
        assert_eq!(store.record_at(decision("r1", "allow"), start), 1);
        assert_eq!(store.record(decision("r2", "deny")), 2);

        let far_future = start + Duration::from_secs(10 * 365 * 24 * 3600);
        assert_eq!(store.live_ids_at(far_future), vec![1, 2]);
        assert_eq!(store.get_by_tag("authorize").len(), 2);
        assert_eq!(store.get_by_request_id_and_tag("r2", "deny").len(), 1);
    }

    #[test]
    fn test_max_items_evicts_oldest() {
        let store = LogStore::new(LogConfig {
            ttl: Duration::from_secs(60),
            max_items: Some(2),
        });
        for i in 0..5 {
            store.record(decision(&format!("r{}", i), "allow"));
        }
        assert_eq!(store.list_ids(), vec![4, 5]);
        assert!(store.get_by_request_id("r0").is_empty());
        assert_eq!(store.get_by_tag("allow").len(), 2);
    }

    #[test]
    fn test_envelope_embeds_json_payload() {
        let store = store();
        let id = store.record(decision("r1", "allow"));
        let envelope = store.get_by_id(id).unwrap().to_json();

        assert_eq!(envelope["id"], json!("1"));
        assert_eq!(envelope["request_id"], json!("r1"));
        assert_eq!(envelope["tags"], json!(["allow", "authorize"]));
        assert_eq!(envelope["payload"]["decision"], json!(true));
        assert!(envelope["created_at"].as_str().is_some());
    }

    #[test]
    fn test_envelope_encodes_binary_payload() {
        let store = store();
        let id = store.record(LogRecord::new(vec![0, 159, 146, 150]));
        let envelope = store.get_by_id(id).unwrap().to_json();
        assert_eq!(envelope["payload"], json!(STANDARD.encode([0u8, 159, 146, 150])));
        assert_eq!(envelope["request_id"], Value::Null);
    }

    proptest! {
        #[test]
        fn prop_indices_agree_with_entries(
            records in prop::collection::vec((0u8..4, prop::collection::btree_set("[a-c]", 0..3)), 0..40)
        ) {
            let store = store();
            let mut ids = Vec::new();
            for (request, tags) in &records {
                let mut record = LogRecord::new(Vec::new()).with_request_id(format!("r{}", request));
                record.tags = tags.clone();
                ids.push(store.record(record));
            }

            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(store.list_ids(), ids.clone());

            for tag in ["a", "b", "c"] {
                let expected: Vec<LogId> = ids
                    .iter()
                    .zip(&records)
                    .filter(|(_, (_, tags))| tags.contains(tag))
                    .map(|(id, _)| *id)
                    .collect();
                let actual: Vec<LogId> = store.get_by_tag(tag).iter().map(|e| e.id).collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
