//! Per-process query context: schema, backend clients and configuration
//!
//! Backend clients are created on first use and then shared by every
//! request. A failed connect leaves the client uninitialized, so the next
//! request retries.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use catstats_core::{BackendResult, MetricsGateway, PrimaryStore, SchemaRegistry};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::GatewayConfig;

type Connector<T> = Box<dyn Fn() -> BoxFuture<'static, BackendResult<Arc<T>>> + Send + Sync>;

/// Backend client initialized on first use
pub struct LazyClient<T: ?Sized> {
    name: String,
    cell: OnceCell<Arc<T>>,
    connect: Connector<T>,
}

impl<T: ?Sized + Send + Sync + 'static> LazyClient<T> {
    /// Client created by `connect` on first use
    pub fn new<F, Fut>(name: &str, connect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BackendResult<Arc<T>>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            cell: OnceCell::new(),
            connect: Box::new(move || connect().boxed()),
        }
    }

    /// Client that is already connected
    pub fn ready(name: &str, client: Arc<T>) -> Self {
        let reconnect = client.clone();
        Self {
            name: name.to_string(),
            cell: OnceCell::new_with(Some(client)),
            connect: Box::new(move || {
                let client = reconnect.clone();
                async move { Ok(client) }.boxed()
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Shared client, connecting first if needed
    pub async fn get(&self) -> BackendResult<Arc<T>> {
        let client = self
            .cell
            .get_or_try_init(|| async {
                debug!(client = %self.name, "Connecting backend client");
                (self.connect)().await.map_err(|e| {
                    warn!(client = %self.name, error = %e, "Backend client connect failed");
                    e
                })
            })
            .await?;
        Ok(client.clone())
    }
}

impl<T: ?Sized> fmt::Debug for LazyClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyClient")
            .field("name", &self.name)
            .field("initialized", &self.cell.initialized())
            .finish()
    }
}

/// Everything a request needs besides its own parameters
pub struct QueryContext {
    registry: Arc<SchemaRegistry>,
    primary: LazyClient<dyn PrimaryStore>,
    metrics: Option<LazyClient<dyn MetricsGateway>>,
    config: GatewayConfig,
}

impl QueryContext {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        primary: LazyClient<dyn PrimaryStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            primary,
            metrics: None,
            config,
        }
    }

    /// Add a metrics gateway. Without one every metrics expand falls back.
    pub fn with_metrics(mut self, metrics: LazyClient<dyn MetricsGateway>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn primary(&self) -> &LazyClient<dyn PrimaryStore> {
        &self.primary
    }

    pub fn metrics(&self) -> Option<&LazyClient<dyn MetricsGateway>> {
        self.metrics.as_ref()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("entities", &self.registry.len())
            .field("primary", &self.primary)
            .field("metrics", &self.metrics)
            .finish()
    }
}
