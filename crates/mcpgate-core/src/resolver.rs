//! Endpoint-name resolution with a TTL-bounded cache.
//!
//! Exactly one `(endpoint, namespace)` tuple resolves a name at any moment;
//! mutations must call `invalidate`, and the optional TTL bounds how long a
//! stale entry can otherwise live.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::model::{Endpoint, Namespace};
use crate::store::GatewayStore;
use mcpgate_protocol::{ErrorKind, GatewayError, GatewayResult};

/// A resolved endpoint with its bound namespace.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    /// The endpoint record
    pub endpoint: Endpoint,
    /// The namespace it binds
    pub namespace: Namespace,
}

/// Per-endpoint public URL set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicUrls {
    /// SSE channel
    pub sse: String,
    /// Streamable HTTP channel
    pub mcp: String,
    /// WebSocket channel
    pub ws: String,
    /// OpenAPI document
    pub openapi: String,
    /// Interactive docs
    pub docs: String,
}

/// Caching endpoint resolver.
pub struct EndpointResolver {
    store: Arc<dyn GatewayStore>,
    cache: Cache<String, Arc<ResolvedEndpoint>>,
}

impl EndpointResolver {
    /// Resolver over a store. `ttl = None` means only mutation invalidates.
    pub fn new(store: Arc<dyn GatewayStore>, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(10_000);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            store,
            cache: builder.build(),
        }
    }

    /// Resolve a public endpoint name to its endpoint and namespace.
    pub async fn resolve(&self, name: &str) -> GatewayResult<Arc<ResolvedEndpoint>> {
        if name.is_empty() {
            return Err(GatewayError::new(
                ErrorKind::InvalidEndpointName,
                "endpoint name is empty",
            ));
        }
        if let Some(resolved) = self.cache.get(name).await {
            return Ok(resolved);
        }

        let endpoint = self
            .store
            .endpoint_by_name(name)
            .await
            .map_err(|e| e.with_component("resolver"))?
            .ok_or_else(|| GatewayError::endpoint_not_found(name))?;
        let namespace = self
            .store
            .namespace(&endpoint.namespace_id)
            .await
            .map_err(|e| e.with_component("resolver"))?
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorKind::NamespaceNotFound,
                    format!(
                        "endpoint '{name}' references missing namespace '{}'",
                        endpoint.namespace_id
                    ),
                )
            })?;

        let resolved = Arc::new(ResolvedEndpoint {
            endpoint,
            namespace,
        });
        self.cache.insert(name.to_string(), Arc::clone(&resolved)).await;
        debug!(endpoint = %name, "endpoint resolved and cached");
        Ok(resolved)
    }

    /// Drop the cached entry; call on any endpoint mutation.
    pub async fn invalidate(&self, name: &str) {
        self.cache.invalidate(name).await;
    }

    /// Public URLs for an endpoint, templated from the gateway base URL.
    pub fn public_urls(base_url: &str, endpoint_name: &str) -> PublicUrls {
        let base = base_url.trim_end_matches('/');
        let root = format!("{base}/api/public/endpoints/{endpoint_name}");
        PublicUrls {
            sse: format!("{root}/sse"),
            mcp: format!("{root}/mcp"),
            ws: format!("{root}/ws"),
            openapi: format!("{root}/api/openapi.json"),
            docs: format!("{root}/api/docs"),
        }
    }
}
