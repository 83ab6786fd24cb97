//! Shared gateway state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::GatewayConfig;
use crate::middleware::rewrite::RewriteTable;
use crate::ratelimit::{CounterStore, FixedWindowLimiter, MemoryCounterStore};
use mcpgate_core::{
    Dispatcher, EndpointResolver, EnvSecretSource, GatewayStore, NamespaceAggregator, PoolOptions,
    SessionPool, TokenValidator, VirtualAdapter,
};
use mcpgate_filter::FilterChain;

/// Everything the handlers and middleware share.
pub struct GatewayState {
    /// Runtime configuration
    pub config: GatewayConfig,
    /// Persistence collaborator
    pub store: Arc<dyn GatewayStore>,
    /// OAuth token-validation collaborator, when configured
    pub token_validator: Option<Arc<dyn TokenValidator>>,
    /// Endpoint-name resolution cache
    pub resolver: EndpointResolver,
    /// Session pool
    pub pool: Arc<SessionPool>,
    /// Namespace aggregator
    pub aggregator: Arc<NamespaceAggregator>,
    /// Request dispatcher
    pub dispatcher: Dispatcher,
    /// Global per-IP limiter, `None` when disabled
    pub global_limiter: Option<FixedWindowLimiter>,
    /// Per-endpoint limiters, cached by endpoint id
    pub endpoint_limiters: DashMap<String, Arc<FixedWindowLimiter>>,
    /// Counter back-end shared by all limiters
    pub counter_store: Arc<dyn CounterStore>,
    /// Path-rewrite rule table
    pub rewrite_table: RewriteTable,
}

impl GatewayState {
    /// Wire the full dataplane together.
    pub fn build(
        config: GatewayConfig,
        store: Arc<dyn GatewayStore>,
        token_validator: Option<Arc<dyn TokenValidator>>,
        filters: FilterChain,
    ) -> Arc<Self> {
        let pool = Arc::new(SessionPool::new(PoolOptions {
            idle_timeout: config.session_idle_timeout(),
            ..PoolOptions::default()
        }));
        let adapter = Arc::new(VirtualAdapter::new(Arc::new(EnvSecretSource)));
        let aggregator = Arc::new(NamespaceAggregator::new(
            Arc::clone(&store),
            Arc::clone(&pool),
            adapter,
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&aggregator), Arc::new(filters));
        let resolver = EndpointResolver::new(Arc::clone(&store), config.endpoint_cache_ttl());

        let counter_store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let global_limiter = (config.global_rate_limit > 0).then(|| {
            FixedWindowLimiter::new(
                Arc::clone(&counter_store),
                config.global_rate_limit,
                Duration::from_secs(config.global_rate_window_secs),
            )
        });

        Arc::new(Self {
            config,
            store,
            token_validator,
            resolver,
            pool,
            aggregator,
            dispatcher,
            global_limiter,
            endpoint_limiters: DashMap::new(),
            counter_store,
            rewrite_table: RewriteTable::default(),
        })
    }

    /// The cached limiter for one endpoint, built from its configured window.
    pub fn endpoint_limiter(
        &self,
        endpoint_id: &str,
        limit: u32,
        window: Duration,
    ) -> Arc<FixedWindowLimiter> {
        self.endpoint_limiters
            .entry(endpoint_id.to_string())
            .or_insert_with(|| {
                Arc::new(FixedWindowLimiter::new(
                    Arc::clone(&self.counter_store),
                    limit,
                    window,
                ))
            })
            .clone()
    }
}
