//! Concurrent instance registry
//!
//! Handles are drawn from a process-wide counter that starts at 1 and is
//! never reset, so a dropped handle can never name a later instance.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{AuthzError, Result};
use crate::instance::{Instance, InstanceBuilder};

/// Opaque instance handle; 0 is never issued
pub type InstanceId = u64;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_instance_id() -> InstanceId {
    let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
    if id == 0 || id == u64::MAX {
        error!("Instance id counter exhausted");
        std::process::abort();
    }
    id
}

/// Map from handle to live instance
#[derive(Debug, Default)]
pub struct Registry {
    instances: DashMap<InstanceId, Arc<Instance>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an instance and register it under a fresh handle
    pub fn create(&self, builder: InstanceBuilder) -> Result<InstanceId> {
        let assembled = builder.assemble()?;
        let id = next_instance_id();
        let instance = Arc::new(assembled.into_instance(id));

        match self.instances.entry(id) {
            Entry::Occupied(_) => {
                error!("Instance id {} registered twice", id);
                std::process::abort();
            }
            Entry::Vacant(slot) => {
                slot.insert(instance);
            }
        }
        Ok(id)
    }

    /// Live instance behind `id`, whatever its state
    pub fn lookup(&self, id: InstanceId) -> Result<Arc<Instance>> {
        self.instances
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(AuthzError::InstanceNotFound(id))
    }

    /// Stop `id` from accepting authorization requests
    pub fn shutdown(&self, id: InstanceId) -> Result<()> {
        let instance = self.lookup(id)?;
        if instance.begin_shutdown() {
            info!("Instance {} shutting down", id);
        } else {
            debug!("Instance {} already shutting down", id);
        }
        Ok(())
    }

    /// Remove `id`; unknown handles are ignored
    pub fn drop_instance(&self, id: InstanceId) {
        match self.instances.remove(&id) {
            Some((_, instance)) => {
                instance.mark_dropped();
                info!("Instance {} dropped", id);
            }
            None => debug!("Drop of unknown instance {} ignored", id),
        }
    }

    /// Drop every live instance
    pub fn cleanup_all(&self) {
        let ids = self.ids();
        for id in &ids {
            self.drop_instance(*id);
        }
        if !ids.is_empty() {
            info!("Dropped {} instances during cleanup", ids.len());
        }
    }

    /// Handles of live instances, ascending
    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.instances.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
