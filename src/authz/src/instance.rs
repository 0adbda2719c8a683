//! Instance state and construction

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BootstrapConfig;
use crate::data_store::DataStore;
use crate::engine::{EvaluationEngine, PolicyEngine};
use crate::error::{AuthzError, Result};
use crate::log_store::LogStore;
use crate::policy::{FilePolicyStoreLoader, PolicyStoreLoader};
use crate::registry::InstanceId;
use crate::stats::InstanceStats;
use crate::token::{TokenValidator, UnverifiedTokenDecoder};

/// Lifecycle state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Accepting authorization requests
    Active,
    /// Rejecting authorization requests; logs remain queryable
    ShuttingDown,
    /// Removed from the registry
    Dropped,
}

/// One configured authorization runtime
pub struct Instance {
    id: InstanceId,
    config: BootstrapConfig,
    policy_store_id: Option<String>,
    engine: Arc<dyn EvaluationEngine>,
    token_validator: Arc<dyn TokenValidator>,
    log_store: LogStore,
    data_store: DataStore,
    stats: InstanceStats,
    state: RwLock<InstanceState>,
}

impl Instance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Store id from the config, falling back to the one the store declares
    pub fn policy_store_id(&self) -> Option<&str> {
        self.policy_store_id.as_deref()
    }

    pub fn engine(&self) -> &dyn EvaluationEngine {
        self.engine.as_ref()
    }

    pub fn token_validator(&self) -> &dyn TokenValidator {
        self.token_validator.as_ref()
    }

    pub fn log_store(&self) -> &LogStore {
        &self.log_store
    }

    /// Context data pushed by the host application
    pub fn data_store(&self) -> &DataStore {
        &self.data_store
    }

    pub fn stats(&self) -> &InstanceStats {
        &self.stats
    }

    pub fn state(&self) -> InstanceState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == InstanceState::Active
    }

    /// Stop accepting requests. Returns false if already past Active.
    pub(crate) fn begin_shutdown(&self) -> bool {
        let mut state = self.state.write();
        if *state == InstanceState::Active {
            *state = InstanceState::ShuttingDown;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_dropped(&self) {
        *self.state.write() = InstanceState::Dropped;
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("application_name", &self.config.application_name)
            .field("state", &self.state())
            .finish()
    }
}

/// Builds an [`Instance`] from a config and optional collaborators
pub struct InstanceBuilder {
    config: BootstrapConfig,
    engine: Option<Arc<dyn EvaluationEngine>>,
    token_validator: Option<Arc<dyn TokenValidator>>,
    loader: Option<Arc<dyn PolicyStoreLoader>>,
}

impl InstanceBuilder {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            engine: None,
            token_validator: None,
            loader: None,
        }
    }

    /// Use a custom evaluation engine instead of [`PolicyEngine`]
    pub fn with_engine(mut self, engine: Arc<dyn EvaluationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Validate tokens with `validator`; required when signature
    /// validation is enabled
    pub fn with_token_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.token_validator = Some(validator);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn PolicyStoreLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Load the policy store and wire collaborators. Nothing here touches
    /// the registry, so a failure never consumes an instance id.
    pub(crate) fn assemble(self) -> Result<AssembledInstance> {
        let token_validator: Arc<dyn TokenValidator> = match self.token_validator {
            Some(validator) => validator,
            None if self.config.jwt_sig_validation => {
                return Err(AuthzError::Config(
                    "`AUTHZ_JWT_SIG_VALIDATION` is enabled but no token validator was provided"
                        .to_string(),
                ))
            }
            None => Arc::new(UnverifiedTokenDecoder),
        };

        let loader: Arc<dyn PolicyStoreLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(FilePolicyStoreLoader),
        };
        let policies = loader.load(&self.config.policy_store)?;
        debug!(
            "Loaded {} policies for application '{}'",
            policies.len(),
            self.config.application_name
        );

        let policy_store_id = self
            .config
            .policy_store_id
            .clone()
            .or_else(|| policies.id.clone());

        let engine: Arc<dyn EvaluationEngine> = match self.engine {
            Some(engine) => engine,
            None => Arc::new(PolicyEngine::new(policies, self.config.default_decision)),
        };

        Ok(AssembledInstance {
            log_store: LogStore::new(self.config.log.clone()),
            data_store: DataStore::new(self.config.data.clone()),
            config: self.config,
            policy_store_id,
            engine,
            token_validator,
        })
    }
}

/// Fully wired instance still waiting for its id
pub(crate) struct AssembledInstance {
    config: BootstrapConfig,
    policy_store_id: Option<String>,
    engine: Arc<dyn EvaluationEngine>,
    token_validator: Arc<dyn TokenValidator>,
    log_store: LogStore,
    data_store: DataStore,
}

impl AssembledInstance {
    pub(crate) fn into_instance(self, id: InstanceId) -> Instance {
        info!(
            "Instance {} created for application '{}'",
            id, self.config.application_name
        );
        Instance {
            id,
            config: self.config,
            policy_store_id: self.policy_store_id,
            engine: self.engine,
            token_validator: self.token_validator,
            log_store: self.log_store,
            data_store: self.data_store,
            stats: InstanceStats::new(),
            state: RwLock::new(InstanceState::Active),
        }
    }
}
