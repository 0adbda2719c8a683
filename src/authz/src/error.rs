//! Error types for the authorization runtime

use thiserror::Error;

use crate::data_store::DataError;
use crate::registry::InstanceId;

/// Authorization runtime errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Bootstrap configuration is unparsable, incomplete or inconsistent
    #[error("Invalid bootstrap configuration: {0}")]
    Config(String),

    /// Handle is unknown, dropped, or no longer accepts requests
    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// Authorization request could not be parsed
    #[error("Malformed authorization request: {0}")]
    RequestParse(String),

    /// A token was rejected by the token validator
    #[error("Token validation failed: {0}")]
    TokenValidation(String),

    /// The evaluation engine failed while deciding
    #[error("Policy evaluation failed: {0}")]
    Evaluation(String),

    /// No live log entry with this id
    #[error("Log entry not found: {0}")]
    LogEntryNotFound(String),

    /// The context data store rejected an operation
    #[error("Data store error: {0}")]
    Data(#[from] DataError),

    /// Policy store could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation; never expected in correct code
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// Stable error category name, used in logs and diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthzError::Config(_) => "config",
            AuthzError::InstanceNotFound(_) => "instance_not_found",
            AuthzError::RequestParse(_) => "request_parse",
            AuthzError::TokenValidation(_) => "token_validation",
            AuthzError::Evaluation(_) => "evaluation",
            AuthzError::LogEntryNotFound(_) => "log_entry_not_found",
            AuthzError::Data(_) => "data",
            AuthzError::Io(_) => "io",
            AuthzError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for AuthzError {
    fn from(err: serde_json::Error) -> Self {
        AuthzError::Internal(format!("serialization failed: {}", err))
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, AuthzError>;
