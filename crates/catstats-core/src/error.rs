//! Common error types for backends and schema loading

use thiserror::Error;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur when talking to the primary store or metrics gateway
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Backend could not be reached or refused the connection
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Timeout waiting for a response
    #[error("Backend call timed out")]
    Timeout,

    /// Backend answered, but the requested relation is not registered there
    #[error("Schema not supported by backend: {0}")]
    SchemaUnsupported(String),

    /// Backend rejected the query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Response could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            BackendError::Unavailable(_) => 503,
            BackendError::Timeout => 504,
            BackendError::SchemaUnsupported(_) => 501,
            BackendError::InvalidQuery(_) => 502,
            BackendError::Malformed(_) => 502,
            BackendError::Internal(_) => 500,
        }
    }
}

/// Errors raised while loading or validating a schema definition
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two entities share a name
    #[error("duplicate entity type: {0}")]
    DuplicateEntity(String),

    /// A navigation points at an entity that is not registered
    #[error("navigation {entity}.{navigation} targets unknown entity {target}")]
    UnknownTarget {
        entity: String,
        navigation: String,
        target: String,
    },

    /// A navigation names a join key that is not a field
    #[error("navigation {entity}.{navigation} uses unknown join key {key}")]
    UnknownJoinKey {
        entity: String,
        navigation: String,
        key: String,
    },

    /// The identity field is not declared
    #[error("entity {entity} declares identity {identity} which is not a field")]
    UnknownIdentity { entity: String, identity: String },

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
