//! catstats-core - Core schema, data model and backend traits
//!
//! This crate holds everything the query layers share: the schema registry
//! that maps logical fields to backend columns, the typed value model, the
//! native query shapes of the two backends and the traits those backends
//! implement.

pub mod backend;
pub mod catalog;
pub mod error;
pub mod graph;
pub mod models;
pub mod params;
pub mod path;
pub mod primary;
pub mod schema;
pub mod value;

pub use backend::{MetricsGateway, PrimaryStore};
pub use error::{BackendError, BackendResult, SchemaError};
pub use graph::{ArgValue, Argument, Field, GraphQuery, Selection};
pub use models::*;
pub use params::{clamp_limit, QueryParams, DEFAULT_LIMIT, MAX_LIMIT};
pub use primary::{
    AggregateKey, AggregateOp, CompareOp, Grouping, Predicate, PrimaryQuery, RelatedQuery,
    SortDirection, SortKey,
};
pub use schema::{
    EntityBinding, FieldBinding, NavigationBinding, RelationKind, SchemaRegistry,
};
pub use value::{FieldType, StatType, TimeWindow, Value};
