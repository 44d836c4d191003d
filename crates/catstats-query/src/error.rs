//! Planning errors and warnings

use std::fmt;

use catstats_odata::ParseError;
use serde::Serialize;
use thiserror::Error;

/// Errors that stop planning. All of them are client errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    /// Expand options failed to bind to the navigation target
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Request shape the planner cannot serve
    #[error("unsupported query: {0}")]
    Unsupported(String),
}

impl PlanError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        400
    }
}

/// Non-fatal planning conditions. Logged and carried on the plan; the
/// request proceeds with a safe default.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanningWarning {
    /// A metric sort could not be turned into a flipped query; the sort is
    /// done in memory instead
    FlipRequestedButNoNavigation { order_by: String, reason: String },
    /// `statType` value was not recognised; the default was used
    InvalidStatTypeIgnored { navigation: String, value: String },
    /// Nested `$select` named no metric of a metrics navigation; every
    /// metric is sampled
    NoMetricSelected { navigation: String },
}

impl fmt::Display for PlanningWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanningWarning::FlipRequestedButNoNavigation { order_by, reason } => {
                write!(f, "cannot flip query for '{}': {}", order_by, reason)
            }
            PlanningWarning::InvalidStatTypeIgnored { navigation, value } => {
                write!(f, "ignored statType '{}' on {}", value, navigation)
            }
            PlanningWarning::NoMetricSelected { navigation } => {
                write!(f, "no metric selected on {}, sampling all metrics", navigation)
            }
        }
    }
}
