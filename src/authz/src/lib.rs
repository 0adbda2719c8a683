//! # CretoAI Embedded Authorization Runtime
//!
//! Instance-scoped policy decision runtime with an indexed, TTL-bounded
//! decision log.
//!
//! ## Features
//!
//! - **Opaque instance handles** issued from a process-wide counter
//! - **Pluggable collaborators**: evaluation engine, token validator and
//!   policy store loader are traits
//! - **Three request shapes**: named tokens, mapped tokens from several
//!   issuers, and unsigned principals with per-principal decisions
//! - **Queryable decision log** by id, tag and request id, with lazy TTL
//!   eviction and destructive drain
//! - **Context data store** per instance, offered to the engine as `data`
//! - **Per-thread last error** for callers on the other side of a C ABI
//!
//! ## Example
//!
//! ```rust
//! use cretoai_authz_runtime::Runtime;
//!
//! let runtime = Runtime::new();
//! let config = br#"{
//!     "AUTHZ_APPLICATION_NAME": "docs",
//!     "AUTHZ_POLICY_STORE_LOCAL": { "policies": [] }
//! }"#;
//! let id = runtime.new_instance(config).unwrap();
//! assert!(runtime.get_log_ids(id).is_empty());
//! runtime.drop_instance(id);
//! ```

pub mod config;
pub mod data_store;
pub mod engine;
pub mod error;
pub mod error_channel;
pub mod gateway;
pub mod instance;
pub mod lifecycle;
pub mod log_store;
pub mod logging;
pub mod policy;
pub mod registry;
pub mod stats;
pub mod token;
pub mod types;

// Re-export commonly used types
pub use config::{BootstrapConfig, DataStoreConfig, LogConfig, PolicyStoreSource, PrincipalDecisionMode};
pub use data_store::{DataEntry, DataError, DataStore, DataStoreStats};
pub use engine::{EngineError, EvaluationEngine, EvaluationOutcome, EvaluationRequest, PolicyEngine};
pub use error::{AuthzError, Result};
pub use instance::{Instance, InstanceBuilder, InstanceState};
pub use lifecycle::{process_cleanup, process_init, runtime, runtime_or_init, Runtime};
pub use log_store::{LogEntry, LogId, LogRecord, LogStore};
pub use policy::{FilePolicyStoreLoader, Policy, PolicyEffect, PolicySet, PolicyStoreLoader};
pub use registry::{InstanceId, Registry};
pub use stats::StatsSnapshot;
pub use token::{TokenClaims, TokenError, TokenValidator, UnverifiedTokenDecoder};
pub use types::{
    ActionId, AuthorizationRequest, AuthorizationResult, Decision, Diagnostics,
    MultiIssuerAuthorizationRequest, Principal, PrincipalDecision, ResourceDescriptor, TokenInput,
    UnsignedAuthorizationRequest, UnsignedAuthorizationResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
