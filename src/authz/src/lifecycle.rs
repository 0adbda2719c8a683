//! Runtime facade and process-wide lifecycle
//!
//! [`Runtime`] owns the registry and exposes every operation the boundary
//! needs. Constructive and targeted operations report failures through the
//! calling thread's error channel; collection queries treat unknown handles
//! as empty.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::BootstrapConfig;
use crate::data_store::{DataEntry, DataStore, DataStoreStats};
use crate::error::{AuthzError, Result};
use crate::error_channel::report;
use crate::gateway;
use crate::instance::InstanceBuilder;
use crate::log_store::{LogEntry, LogId, LogStore};
use crate::logging;
use crate::registry::{InstanceId, Registry};
use crate::stats::StatsSnapshot;

/// Owner of all instances
#[derive(Debug, Default)]
pub struct Runtime {
    registry: Registry,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register an instance built from `builder`
    pub fn create(&self, builder: InstanceBuilder) -> Result<InstanceId> {
        report(self.registry.create(builder))
    }

    /// Create an instance from a JSON bootstrap config
    pub fn new_instance(&self, config_json: &[u8]) -> Result<InstanceId> {
        let config = report(BootstrapConfig::from_json(config_json))?;
        self.create(InstanceBuilder::new(config))
    }

    /// Create an instance from an optional JSON config overlaid with the
    /// process environment
    pub fn new_instance_with_env(&self, config_json: Option<&[u8]>) -> Result<InstanceId> {
        self.new_instance_with_vars(config_json, std::env::vars())
    }

    /// Like [`Runtime::new_instance_with_env`] with explicit variables
    pub fn new_instance_with_vars<I>(&self, config_json: Option<&[u8]>, vars: I) -> Result<InstanceId>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = report(BootstrapConfig::from_json_with_env(config_json, vars))?;
        self.create(InstanceBuilder::new(config))
    }

    pub fn authorize(&self, id: InstanceId, request_json: &[u8]) -> Result<Vec<u8>> {
        report(
            self.registry
                .lookup(id)
                .and_then(|instance| gateway::authorize(&instance, request_json)),
        )
    }

    /// Like [`Runtime::authorize`] for mapped tokens from several issuers
    pub fn authorize_multi_issuer(&self, id: InstanceId, request_json: &[u8]) -> Result<Vec<u8>> {
        report(
            self.registry
                .lookup(id)
                .and_then(|instance| gateway::authorize_multi_issuer(&instance, request_json)),
        )
    }

    /// Like [`Runtime::authorize`] for principals described by the caller
    pub fn authorize_unsigned(&self, id: InstanceId, request_json: &[u8]) -> Result<Vec<u8>> {
        report(
            self.registry
                .lookup(id)
                .and_then(|instance| gateway::authorize_unsigned(&instance, request_json)),
        )
    }

    /// Store a JSON value under `key`. Rejected once the instance shuts down.
    pub fn push_data(
        &self,
        id: InstanceId,
        key: &str,
        value_json: &[u8],
        ttl: Option<Duration>,
    ) -> Result<()> {
        report(self.registry.lookup(id).and_then(|instance| {
            if !instance.is_active() {
                return Err(AuthzError::InstanceNotFound(id));
            }
            let value: Value = serde_json::from_slice(value_json).map_err(|e| {
                AuthzError::RequestParse(format!("data value is not valid JSON: {}", e))
            })?;
            instance.data_store().push(key, value, ttl)?;
            Ok(())
        }))
    }

    pub fn get_data(&self, id: InstanceId, key: &str) -> Result<Option<Value>> {
        self.with_data(id, |store| store.get(key))
    }

    pub fn get_data_entry(&self, id: InstanceId, key: &str) -> Result<Option<DataEntry>> {
        self.with_data(id, |store| store.get_entry(key))
    }

    /// Whether `key` was live and got removed
    pub fn remove_data(&self, id: InstanceId, key: &str) -> Result<bool> {
        self.with_data(id, |store| store.remove(key))
    }

    pub fn clear_data(&self, id: InstanceId) -> Result<()> {
        self.with_data(id, DataStore::clear)
    }

    pub fn list_data(&self, id: InstanceId) -> Result<Vec<DataEntry>> {
        self.with_data(id, DataStore::list)
    }

    pub fn data_stats(&self, id: InstanceId) -> Result<DataStoreStats> {
        self.with_data(id, DataStore::stats)
    }

    /// Remove and return every live entry
    pub fn pop_logs(&self, id: InstanceId) -> Vec<Arc<LogEntry>> {
        self.with_logs(id, LogStore::drain_all)
    }

    /// Ids of every live entry, in boundary form
    pub fn get_log_ids(&self, id: InstanceId) -> Vec<String> {
        self.with_logs(id, |store| {
            store.list_ids().into_iter().map(|id| id.to_string()).collect()
        })
    }

    pub fn get_logs_by_tag(&self, id: InstanceId, tag: &str) -> Vec<Arc<LogEntry>> {
        self.with_logs(id, |store| store.get_by_tag(tag))
    }

    pub fn get_logs_by_request_id(&self, id: InstanceId, request_id: &str) -> Vec<Arc<LogEntry>> {
        self.with_logs(id, |store| store.get_by_request_id(request_id))
    }

    pub fn get_logs_by_request_id_and_tag(
        &self,
        id: InstanceId,
        request_id: &str,
        tag: &str,
    ) -> Vec<Arc<LogEntry>> {
        self.with_logs(id, |store| store.get_by_request_id_and_tag(request_id, tag))
    }

    /// Entry with `log_id`; unknown handles and ids are hard errors
    pub fn get_log_by_id(&self, id: InstanceId, log_id: &str) -> Result<Arc<LogEntry>> {
        report(self.registry.lookup(id).and_then(|instance| {
            log_id
                .trim()
                .parse::<LogId>()
                .ok()
                .and_then(|parsed| instance.log_store().get_by_id(parsed))
                .ok_or_else(|| AuthzError::LogEntryNotFound(log_id.to_string()))
        }))
    }

    pub fn shutdown(&self, id: InstanceId) -> Result<()> {
        report(self.registry.shutdown(id))
    }

    /// Idempotent
    pub fn drop_instance(&self, id: InstanceId) {
        self.registry.drop_instance(id);
    }

    pub fn stats(&self, id: InstanceId) -> Result<StatsSnapshot> {
        report(self.registry.lookup(id).map(|instance| instance.stats().snapshot()))
    }

    /// Drop every instance
    pub fn cleanup(&self) {
        self.registry.cleanup_all();
    }

    /// Data store access; unlike log queries an unknown handle is an error
    fn with_data<T>(&self, id: InstanceId, op: impl FnOnce(&DataStore) -> T) -> Result<T> {
        report(self.registry.lookup(id).map(|instance| op(instance.data_store())))
    }

    fn with_logs<T: Default>(&self, id: InstanceId, query: impl FnOnce(&LogStore) -> T) -> T {
        match self.registry.lookup(id) {
            Ok(instance) => query(instance.log_store()),
            Err(_) => {
                debug!("Log query on unknown instance {} returns nothing", id);
                T::default()
            }
        }
    }
}

static RUNTIME: RwLock<Option<Arc<Runtime>>> = parking_lot::const_rwlock(None);

/// Establish the process-wide runtime and logging sink. Idempotent.
pub fn process_init() -> Arc<Runtime> {
    let mut slot = RUNTIME.write();
    match slot.as_ref() {
        Some(runtime) => Arc::clone(runtime),
        None => {
            logging::init();
            let runtime = Arc::new(Runtime::new());
            *slot = Some(Arc::clone(&runtime));
            info!("Authorization runtime {} initialized", crate::VERSION);
            runtime
        }
    }
}

/// Drop every instance and release the process-wide runtime. Safe to call
/// repeatedly.
pub fn process_cleanup() {
    let runtime = RUNTIME.write().take();
    if let Some(runtime) = runtime {
        runtime.cleanup();
        info!("Authorization runtime cleaned up");
    }
}

/// The process-wide runtime, if initialized
pub fn runtime() -> Option<Arc<Runtime>> {
    RUNTIME.read().clone()
}

/// The process-wide runtime, initializing it on first use
pub fn runtime_or_init() -> Arc<Runtime> {
    match runtime() {
        Some(runtime) => runtime,
        None => process_init(),
    }
}
