//! Gateway errors
//!
//! Client errors (`Parse`, `Plan`) and backend errors never share a variant,
//! so callers can tell "fix your query" from "try again later".

use catstats_core::BackendError;
use catstats_odata::ParseError;
use catstats_query::PlanError;
use thiserror::Error;

/// Errors returned by [`crate::StatsGateway`] and [`crate::Executor`]
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Query string rejected before any backend call
    #[error("invalid query: {0}")]
    Parse(#[from] ParseError),

    /// Expand options rejected while planning
    #[error("invalid query: {0}")]
    Plan(#[from] PlanError),

    /// Primary store failed on a path with no fallback
    #[error("primary store failed: {0}")]
    Primary(BackendError),

    /// Metrics path and its primary-store fallback both failed
    #[error("metrics path failed ({metrics}); fallback failed ({fallback})")]
    FallbackExhausted {
        metrics: BackendError,
        fallback: BackendError,
    },
}

impl GatewayError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Parse(e) => e.status_code(),
            GatewayError::Plan(e) => e.status_code(),
            GatewayError::Primary(e) => e.status_code(),
            GatewayError::FallbackExhausted { .. } => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, GatewayError::Parse(_) | GatewayError::Plan(_))
    }
}

/// Errors loading gateway configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
