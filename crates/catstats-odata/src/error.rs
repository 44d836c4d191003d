//! Parse errors - always a client-input problem

use catstats_core::FieldType;
use thiserror::Error;

/// Result type for query-string parsing
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised while parsing or validating OData query parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("unknown field {field} on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("field {0} is not filterable")]
    NotFilterable(String),

    #[error("field {0} is not sortable")]
    NotSortable(String),

    #[error("field {0} is not groupable")]
    NotGroupable(String),

    /// `sum`/`average` over a non-numeric field
    #[error("cannot apply {op} to non-numeric field {field}")]
    NotAggregatable { field: String, op: String },

    #[error("unknown navigation {navigation} on {entity}")]
    UnknownNavigation { entity: String, navigation: String },

    #[error("invalid $filter: {0}")]
    InvalidFilterSyntax(String),

    #[error("invalid $orderby: {0}")]
    InvalidOrderBySyntax(String),

    #[error("invalid $apply: {0}")]
    InvalidApplySyntax(String),

    #[error("invalid $expand: {0}")]
    InvalidExpandSyntax(String),

    #[error("invalid $expand option {option}: {reason}")]
    InvalidExpandOption { option: String, reason: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Literal does not match the declared field type
    #[error("literal {literal} is not a valid {expected} for field {field}")]
    InvalidLiteral {
        field: String,
        literal: String,
        expected: FieldType,
    },

    #[error("invalid value for parameter {name}: {value}")]
    InvalidParameter { name: String, value: String },
}

impl ParseError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        400
    }

    pub(crate) fn unknown_field(entity: &str, field: &str) -> Self {
        ParseError::UnknownField {
            entity: entity.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn expand_option(option: &str, reason: impl Into<String>) -> Self {
        ParseError::InvalidExpandOption {
            option: option.to_string(),
            reason: reason.into(),
        }
    }
}
