//! catstats-gateway - query execution over the primary store and the
//! metrics gateway
//!
//! [`StatsGateway`] is the entry point: it parses a request, plans it and
//! hands the plan to the [`Executor`], which runs the metrics path with
//! fallback to the primary store and merges everything into canonical
//! records.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use catstats_core::{QueryParams, SchemaRegistry};
//! use catstats_gateway::{in_memory_context, Fixture, GatewayConfig, MemoryDataset, StatsGateway};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(SchemaRegistry::builtin());
//! let fixture = Fixture::from_file("fixtures/demo.json")?;
//! let data = MemoryDataset::from_fixture(registry, &fixture);
//! let gateway = StatsGateway::new(in_memory_context(&data, GatewayConfig::default()));
//!
//! let params = QueryParams::default().with_expand("stats").with_order_by("stats/heartRate desc");
//! let output = gateway.list("Cat", &params).await?;
//! println!("{}", serde_json::to_string_pretty(&output)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod decode;
pub mod error;
pub mod executor;
pub mod memory;
pub mod merge;
pub mod service;

pub use config::{BackendsConfig, ExecutionConfig, GatewayConfig, SchemaConfig};
pub use context::{LazyClient, QueryContext};
pub use decode::{decode_metrics, is_structurally_empty, DecodedRow};
pub use error::{ConfigError, GatewayError};
pub use executor::{ExecutionPath, Executor, QueryOutput};
pub use memory::{
    in_memory_context, Fixture, FixtureError, InMemoryMetricsGateway, InMemoryPrimaryStore,
    MemoryDataset,
};
pub use service::StatsGateway;
