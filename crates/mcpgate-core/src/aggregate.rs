//! Namespace aggregation and prefixed-name routing.
//!
//! `aggregate` fans discovery out across every active link of a namespace,
//! bounded by a semaphore; each task returns its own slice and the slices
//! are joined in link order, so no shared accumulator exists. Failed
//! upstreams contribute zero tools and a warning; aggregation only fails
//! outright when every upstream failed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::adapter::VirtualAdapter;
use crate::discovery::discover_and_store;
use crate::model::{LinkStatus, McpServer, Namespace, NamespaceServer, VirtualServer};
use crate::pool::SessionPool;
use crate::store::GatewayStore;
use mcpgate_protocol::{
    CallToolResult, ErrorKind, GatewayError, GatewayResult, JsonRpcResponse, METHOD_CALL_TOOL,
    ToolRecord, sanitize_name, split_prefixed_name,
};

/// Bound on concurrent per-upstream discovery within one namespace.
pub const DISCOVERY_CONCURRENCY: usize = 16;

/// Either half of a namespace link target.
enum Upstream {
    Real(McpServer),
    Virtual(VirtualServer),
}

/// Aggregates tool catalogues and routes prefixed tool calls.
pub struct NamespaceAggregator {
    store: Arc<dyn GatewayStore>,
    pool: Arc<SessionPool>,
    adapter: Arc<VirtualAdapter>,
    cache: DashMap<String, Arc<Vec<ToolRecord>>>,
    semaphore: Arc<Semaphore>,
}

impl NamespaceAggregator {
    /// Build an aggregator over a store, pool and virtual adapter.
    pub fn new(
        store: Arc<dyn GatewayStore>,
        pool: Arc<SessionPool>,
        adapter: Arc<VirtualAdapter>,
    ) -> Self {
        Self {
            store,
            pool,
            adapter,
            cache: DashMap::new(),
            semaphore: Arc::new(Semaphore::new(DISCOVERY_CONCURRENCY)),
        }
    }

    async fn load_namespace(&self, namespace_id: &str) -> GatewayResult<Namespace> {
        let namespace = self
            .store
            .namespace(namespace_id)
            .await
            .map_err(|e| e.with_component("aggregator"))?
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorKind::NamespaceNotFound,
                    format!("no namespace '{namespace_id}'"),
                )
            })?;
        if !namespace.active {
            return Err(GatewayError::new(
                ErrorKind::NamespaceNotFound,
                format!("namespace '{}' is inactive", namespace.name),
            ));
        }
        Ok(namespace)
    }

    async fn upstream(&self, server_id: &str) -> GatewayResult<Option<Upstream>> {
        if let Some(server) = self.store.server(server_id).await? {
            return Ok(Some(Upstream::Real(server)));
        }
        if let Some(vs) = self.store.virtual_server(server_id).await? {
            return Ok(Some(Upstream::Virtual(vs)));
        }
        Ok(None)
    }

    /// The namespace's aggregated, override-filtered, ordered catalogue.
    pub async fn aggregate(&self, namespace_id: &str) -> GatewayResult<Arc<Vec<ToolRecord>>> {
        if let Some(cached) = self.cache.get(namespace_id) {
            return Ok(Arc::clone(&cached));
        }

        let namespace = self.load_namespace(namespace_id).await?;
        let links = namespace.active_links();

        // One future per link; the semaphore bounds how many discoveries run
        // at once, and each future returns its own slice.
        let tasks = links.iter().map(|link| {
            let link = (*link).clone();
            let namespace_id = namespace_id.to_string();
            async move {
                let _permit = self.semaphore.acquire().await.expect("semaphore closed");
                let result = self.discover_link(&namespace_id, &link).await;
                (link, result)
            }
        });
        let outcomes = join_all(tasks).await;

        let overrides = self.inactive_overrides(namespace_id).await?;

        let mut merged: Vec<ToolRecord> = Vec::new();
        let mut seen_prefixed: HashSet<String> = HashSet::new();
        let mut failures = 0usize;
        for (link, outcome) in &outcomes {
            match outcome {
                Ok(records) => {
                    let mut records = records.clone();
                    records.sort_by(|a, b| a.raw_name.cmp(&b.raw_name));
                    for record in records {
                        if overrides.contains(&(record.server_id.clone(), record.raw_name.clone()))
                        {
                            continue;
                        }
                        // Collisions resolve in link order: priority, then
                        // upstream id, then raw name. First wins.
                        if seen_prefixed.insert(record.prefixed_name.clone()) {
                            merged.push(record);
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        namespace = %namespace_id,
                        server = %link.server_id,
                        error = %e,
                        "upstream failed discovery, contributing zero tools"
                    );
                }
            }
        }

        if !outcomes.is_empty() && failures == outcomes.len() {
            return Err(GatewayError::new(
                ErrorKind::UpstreamClosed,
                format!("all {failures} upstreams of namespace '{namespace_id}' failed discovery"),
            )
            .with_component("aggregator"));
        }

        debug!(
            namespace = %namespace_id,
            tools = merged.len(),
            upstreams = outcomes.len(),
            failed = failures,
            "aggregated namespace catalogue"
        );
        let merged = Arc::new(merged);
        self.cache.insert(namespace_id.to_string(), Arc::clone(&merged));
        Ok(merged)
    }

    async fn discover_link(
        &self,
        namespace_id: &str,
        link: &NamespaceServer,
    ) -> GatewayResult<Vec<ToolRecord>> {
        match self.upstream(&link.server_id).await? {
            Some(Upstream::Virtual(vs)) => Ok(VirtualAdapter::list_tools(&vs)),
            Some(Upstream::Real(server)) => {
                if !server.active {
                    warn!(server = %server.name, "skipping inactive upstream");
                    return Ok(Vec::new());
                }
                // Discovery is idempotent: retry per the server's budget on
                // retryable kinds.
                let mut attempt = 0u32;
                loop {
                    let result = async {
                        let session = self.pool.get(namespace_id, &server).await?;
                        discover_and_store(&session, &server, &self.store).await
                    }
                    .await;
                    match result {
                        Ok(records) => return Ok(records),
                        Err(e) if e.kind.is_retryable() && attempt < server.max_retries => {
                            attempt += 1;
                            warn!(
                                server = %server.name,
                                attempt,
                                error = %e,
                                "retrying discovery"
                            );
                            self.pool.clear_server(namespace_id, &server.id).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            None => Err(GatewayError::new(
                ErrorKind::PersistenceFailure,
                format!("link references unknown server '{}'", link.server_id),
            )),
        }
    }

    async fn inactive_overrides(
        &self,
        namespace_id: &str,
    ) -> GatewayResult<HashSet<(String, String)>> {
        Ok(self
            .store
            .tool_overrides(namespace_id)
            .await?
            .into_iter()
            .filter(|o| o.status == LinkStatus::Inactive)
            .map(|o| (o.server_id, o.raw_name))
            .collect())
    }

    /// Execute a prefixed tool call within a namespace.
    pub async fn execute(
        &self,
        namespace_id: &str,
        prefixed_name: &str,
        arguments: Option<HashMap<String, Value>>,
    ) -> GatewayResult<CallToolResult> {
        let (prefix, raw_name) = split_prefixed_name(prefixed_name)
            .ok_or_else(|| GatewayError::invalid_tool_name(prefixed_name))?;

        let namespace = self.load_namespace(namespace_id).await?;

        // Walk all links in priority order so an inactive matching link is
        // reported as such rather than as not-found.
        let mut links: Vec<&NamespaceServer> = namespace.servers.iter().collect();
        links.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.server_id.cmp(&b.server_id))
        });

        for link in links {
            let Some(upstream) = self.upstream(&link.server_id).await? else {
                continue;
            };
            let upstream_name = match &upstream {
                Upstream::Real(server) => &server.name,
                Upstream::Virtual(vs) => &vs.name,
            };
            if sanitize_name(upstream_name) != prefix {
                continue;
            }
            if link.status != LinkStatus::Active {
                return Err(GatewayError::new(
                    ErrorKind::UpstreamInactive,
                    format!("upstream '{upstream_name}' is inactive in this namespace"),
                ));
            }
            return match upstream {
                Upstream::Virtual(vs) => {
                    self.adapter
                        .call_tool(&vs, raw_name, arguments.as_ref())
                        .await
                }
                Upstream::Real(server) => {
                    if !server.active {
                        return Err(GatewayError::new(
                            ErrorKind::UpstreamInactive,
                            format!("upstream '{}' is inactive", server.name),
                        ));
                    }
                    self.call_real(namespace_id, &server, raw_name, arguments)
                        .await
                }
            };
        }

        Err(GatewayError::tool_not_found(prefixed_name).with_component("aggregator"))
    }

    async fn call_real(
        &self,
        namespace_id: &str,
        server: &McpServer,
        raw_name: &str,
        arguments: Option<HashMap<String, Value>>,
    ) -> GatewayResult<CallToolResult> {
        let session = self.pool.get(namespace_id, server).await?;
        let params = serde_json::json!({
            "name": raw_name,
            "arguments": arguments.unwrap_or_default(),
        });
        let reply = session
            .request(
                METHOD_CALL_TOOL,
                Some(params),
                Duration::from_secs(server.timeout_secs),
            )
            .await?;
        Self::parse_call_reply(reply, raw_name)
    }

    fn parse_call_reply(reply: JsonRpcResponse, raw_name: &str) -> GatewayResult<CallToolResult> {
        match reply.into_result() {
            Ok(result) => serde_json::from_value(result).map_err(|e| {
                GatewayError::new(
                    ErrorKind::ProtocolError,
                    format!("malformed tools/call result for '{raw_name}': {e}"),
                )
            }),
            Err(e) if e.code == mcpgate_protocol::jsonrpc::codes::METHOD_NOT_FOUND => {
                Err(GatewayError::tool_not_found(raw_name))
            }
            Err(e) => Err(GatewayError::new(
                ErrorKind::ProtocolError,
                format!("upstream rejected tools/call for '{raw_name}': {e}"),
            )),
        }
    }

    /// Proxy an arbitrary MCP request to one nominated upstream.
    ///
    /// `server_hint` comes from the path-rewrite context. Without a hint the
    /// call only succeeds in a single-upstream namespace; guessing a target
    /// in a multi-upstream namespace is never done.
    pub async fn proxy(
        &self,
        namespace_id: &str,
        server_hint: Option<&str>,
        method: &str,
        params: Option<Value>,
    ) -> GatewayResult<JsonRpcResponse> {
        let namespace = self.load_namespace(namespace_id).await?;
        let links = namespace.active_links();

        let target_id = match server_hint {
            Some(hint) => {
                let link = links
                    .iter()
                    .find(|l| l.server_id == hint)
                    .ok_or_else(|| {
                        GatewayError::new(
                            ErrorKind::ToolNotFound,
                            format!("server '{hint}' is not an active member of this namespace"),
                        )
                    })?;
                link.server_id.clone()
            }
            None if links.len() == 1 => links[0].server_id.clone(),
            None => {
                return Err(GatewayError::new(
                    ErrorKind::AmbiguousTarget,
                    "namespace has multiple upstreams; nominate one with X-MCP-Server-ID",
                ));
            }
        };

        let server = self
            .store
            .server(&target_id)
            .await?
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorKind::ToolNotFound,
                    format!("server '{target_id}' not found"),
                )
            })?;
        let session = self.pool.get(namespace_id, &server).await?;
        session
            .request(method, params, Duration::from_secs(server.timeout_secs))
            .await
    }

    /// Drop one namespace's cached catalogue; call on any namespace, server
    /// or override mutation.
    pub fn invalidate(&self, namespace_id: &str) {
        self.cache.remove(namespace_id);
    }

    /// Drop every cached catalogue.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}
