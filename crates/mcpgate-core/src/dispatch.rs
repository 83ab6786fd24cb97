//! The request dispatcher.
//!
//! Given a resolved endpoint, an authenticated request and a parsed MCP
//! message, route it: `tools/list` is answered from aggregation,
//! `tools/call` runs through the outbound filter chain, the aggregator and
//! the inbound chain, and anything else is proxied to a single nominated
//! upstream or rejected as ambiguous.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::aggregate::NamespaceAggregator;
use crate::model::{Endpoint, Namespace};
use mcpgate_filter::{ChainOutcome, FilterChain, FilterDirection};
use mcpgate_protocol::{
    CallToolParams, CallToolResult, ErrorKind, GatewayError, GatewayResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, METHOD_CALL_TOOL, METHOD_LIST_TOOLS, RequestId, Tool,
    jsonrpc::codes,
};

/// What the middleware pipeline established about the request.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// The resolved endpoint
    pub endpoint: Endpoint,
    /// Its bound namespace
    pub namespace: Namespace,
    /// Upstream nominated by path rewrite (`X-MCP-Server-ID`)
    pub server_hint: Option<String>,
}

/// Routes MCP messages for one gateway instance.
pub struct Dispatcher {
    aggregator: Arc<NamespaceAggregator>,
    filters: Arc<FilterChain>,
}

impl Dispatcher {
    /// Build a dispatcher over the aggregator and filter chain.
    pub fn new(aggregator: Arc<NamespaceAggregator>, filters: Arc<FilterChain>) -> Self {
        Self {
            aggregator,
            filters,
        }
    }

    /// The aggregator, for surfaces that list tools directly.
    pub fn aggregator(&self) -> &Arc<NamespaceAggregator> {
        &self.aggregator
    }

    /// Handle one MCP request end to end. Gateway-side failures become MCP
    /// error responses carrying the gateway error code in `data`.
    pub async fn dispatch(
        &self,
        ctx: &DispatchContext,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        let result = self.dispatch_inner(ctx, request).await;
        match result {
            Ok(response) => response,
            Err(e) => error_response(Some(id), &e),
        }
    }

    async fn dispatch_inner(
        &self,
        ctx: &DispatchContext,
        request: JsonRpcRequest,
    ) -> GatewayResult<JsonRpcResponse> {
        debug!(
            endpoint = %ctx.endpoint.name,
            method = %request.method,
            "dispatching"
        );
        match request.method.as_str() {
            METHOD_LIST_TOOLS => {
                let tools = self.list_tools(ctx).await?;
                Ok(JsonRpcResponse::success(request.id, json!({ "tools": tools })))
            }
            METHOD_CALL_TOOL => {
                let params: CallToolParams = request
                    .params
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| {
                        GatewayError::new(
                            ErrorKind::InvalidMessage,
                            format!("bad tools/call params: {e}"),
                        )
                    })?
                    .ok_or_else(|| {
                        GatewayError::new(ErrorKind::InvalidMessage, "tools/call requires params")
                    })?;
                let result = self
                    .call_tool(ctx, &params.name, params.arguments)
                    .await?;
                Ok(JsonRpcResponse::success(
                    request.id,
                    serde_json::to_value(result)?,
                ))
            }
            _ => {
                let reply = self
                    .aggregator
                    .proxy(
                        &ctx.namespace.id,
                        ctx.server_hint.as_deref(),
                        &request.method,
                        request.params,
                    )
                    .await?;
                // Re-home the upstream payload under the client's request id.
                Ok(JsonRpcResponse {
                    jsonrpc: mcpgate_protocol::JsonRpcVersion,
                    payload: reply.payload,
                    id: Some(request.id),
                })
            }
        }
    }

    /// The endpoint's aggregated tool catalogue in wire shape.
    pub async fn list_tools(&self, ctx: &DispatchContext) -> GatewayResult<Vec<Tool>> {
        let records = self.aggregator.aggregate(&ctx.namespace.id).await?;
        Ok(records
            .iter()
            .map(|record| Tool {
                name: record.prefixed_name.clone(),
                description: record.description.clone(),
                input_schema: record.input_schema.clone(),
            })
            .collect())
    }

    /// Execute one prefixed tool call with both filter directions applied.
    pub async fn call_tool(
        &self,
        ctx: &DispatchContext,
        prefixed_name: &str,
        arguments: Option<HashMap<String, Value>>,
    ) -> GatewayResult<CallToolResult> {
        // Outbound: the client's arguments.
        let arguments = match &arguments {
            Some(args) => {
                let serialized = serde_json::to_string(args)?;
                let outcome = self.filters.apply(FilterDirection::Outbound, &serialized).await;
                if outcome.blocked {
                    return Err(policy_block(&outcome, "arguments"));
                }
                if outcome.modified {
                    Some(serde_json::from_str(&outcome.content).map_err(|e| {
                        GatewayError::new(
                            ErrorKind::PluginFailure,
                            format!("filter chain produced non-JSON arguments: {e}"),
                        )
                    })?)
                } else {
                    Some(args.clone())
                }
            }
            None => None,
        };

        let result = self
            .aggregator
            .execute(&ctx.namespace.id, prefixed_name, arguments)
            .await?;

        // Inbound: the upstream's reply.
        let serialized = serde_json::to_string(&result)?;
        let outcome = self.filters.apply(FilterDirection::Inbound, &serialized).await;
        if outcome.blocked {
            return Err(policy_block(&outcome, "result"));
        }
        if outcome.modified {
            serde_json::from_str(&outcome.content).map_err(|e| {
                GatewayError::new(
                    ErrorKind::PluginFailure,
                    format!("filter chain produced a malformed result: {e}"),
                )
            })
        } else {
            Ok(result)
        }
    }
}

fn policy_block(outcome: &ChainOutcome, what: &str) -> GatewayError {
    GatewayError::new(
        ErrorKind::PolicyBlock,
        format!("content filter blocked the {what}"),
    )
    .with_details(json!({
        "violations": outcome.violations,
        "reason": outcome.reason,
    }))
    .with_component("dispatcher")
}

/// Translate a gateway error into an MCP error response.
pub fn error_response(id: Option<RequestId>, error: &GatewayError) -> JsonRpcResponse {
    let code = match error.kind {
        ErrorKind::InvalidMessage => codes::INVALID_REQUEST,
        ErrorKind::InvalidToolName | ErrorKind::ToolNotFound => codes::INVALID_PARAMS,
        ErrorKind::Internal | ErrorKind::PersistenceFailure | ErrorKind::PluginFailure => {
            codes::INTERNAL_ERROR
        }
        // Gateway-specific kinds use the implementation-defined range.
        _ => -32000,
    };
    let mut rpc_error = JsonRpcError::new(code, error.message.clone())
        .with_data(json!({ "error": error.kind.code() }));
    if let Some(details) = &error.details {
        rpc_error = rpc_error.with_data(json!({
            "error": error.kind.code(),
            "details": details,
        }));
    }
    JsonRpcResponse::error(id, rpc_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::VirtualAdapter;
    use crate::model::{EndpointAuth, LinkStatus, NamespaceServer, RecipeAuth, RestRecipe,
        VirtualServer, VirtualToolDef};
    use crate::pool::{PoolOptions, SessionPool};
    use crate::secrets::StaticSecretSource;
    use crate::store::MemoryStore;
    use mcpgate_filter::{FilterFactory, FilterKind, FilterMode};
    use pretty_assertions::assert_eq;

    fn context() -> DispatchContext {
        DispatchContext {
            endpoint: Endpoint {
                id: "ep-1".into(),
                org: "org-1".into(),
                name: "demo".into(),
                namespace_id: "ns-1".into(),
                auth: EndpointAuth {
                    public: true,
                    ..EndpointAuth::default()
                },
                rate_limit: None,
                cors: None,
                active: true,
            },
            namespace: Namespace {
                id: "ns-1".into(),
                org: "org-1".into(),
                name: "ns1".into(),
                active: true,
                servers: vec![NamespaceServer {
                    server_id: "vs-echo".into(),
                    status: LinkStatus::Active,
                    priority: 0,
                }],
            },
            server_hint: None,
        }
    }

    fn echo_virtual_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.put_virtual_server(VirtualServer {
            id: "vs-echo".into(),
            org: "org-1".into(),
            name: "echo".into(),
            tools: vec![VirtualToolDef {
                name: "send".into(),
                description: None,
                input_schema: None,
                recipe: RestRecipe {
                    method: "POST".into(),
                    url: "http://127.0.0.1:1/unused".into(),
                    headers: HashMap::new(),
                    body_map: HashMap::new(),
                    auth: Some(RecipeAuth {
                        auth_type: "bearer".into(),
                        token: "t".into(),
                    }),
                    timeout_secs: Some(1),
                },
            }],
        });
        store
            .put_namespace(context().namespace)
            .unwrap();
        store
    }

    fn dispatcher_with_filters(store: Arc<MemoryStore>, filters: FilterChain) -> Dispatcher {
        let pool = Arc::new(SessionPool::new(PoolOptions {
            handshake: false,
            ..PoolOptions::default()
        }));
        let adapter = Arc::new(VirtualAdapter::new(Arc::new(StaticSecretSource::default())));
        let aggregator = Arc::new(NamespaceAggregator::new(store, pool, adapter));
        Dispatcher::new(aggregator, Arc::new(filters))
    }

    #[tokio::test]
    async fn tools_list_answers_from_aggregation() {
        let dispatcher = dispatcher_with_filters(echo_virtual_store(), FilterChain::empty());
        let request = JsonRpcRequest::new(1, METHOD_LIST_TOOLS, None);
        let response = dispatcher.dispatch(&context(), request).await;
        let result = response.into_result().unwrap();
        assert_eq!(result["tools"][0]["name"], json!("echo__send"));
    }

    #[tokio::test]
    async fn blocked_arguments_become_policy_error() {
        let regex_config = serde_json::json!({
            "rules": [{
                "name": "no-password",
                "pattern": "password=\\w+",
                "severity": "high",
                "action": "block"
            }]
        });
        let plugin = FilterFactory::build(FilterKind::Regex, regex_config, FilterMode::Enforcing)
            .unwrap();
        let chain = FilterChain::new(vec![plugin]);
        let dispatcher = dispatcher_with_filters(echo_virtual_store(), chain);

        let request = JsonRpcRequest::new(
            2,
            METHOD_CALL_TOOL,
            Some(json!({
                "name": "echo__send",
                "arguments": {"text": "password=hunter2"}
            })),
        );
        let response = dispatcher.dispatch(&context(), request).await;
        let error = response.error_payload().unwrap();
        assert_eq!(
            error.data.as_ref().unwrap()["error"],
            json!("policy_block")
        );
    }

    #[tokio::test]
    async fn unknown_method_without_hint_is_ambiguous_only_with_multiple_upstreams() {
        // Single-upstream namespace: proxying picks the only member. The
        // member here is virtual, which the raw proxy path cannot serve, so
        // the call fails downstream -- but not with ambiguous_target.
        let dispatcher = dispatcher_with_filters(echo_virtual_store(), FilterChain::empty());
        let request = JsonRpcRequest::new(3, "resources/list", None);
        let response = dispatcher.dispatch(&context(), request).await;
        let error = response.error_payload().unwrap();
        assert_ne!(
            error.data.as_ref().unwrap()["error"],
            json!("ambiguous_target")
        );
    }

    #[tokio::test]
    async fn bad_call_params_are_invalid_message() {
        let dispatcher = dispatcher_with_filters(echo_virtual_store(), FilterChain::empty());
        let request = JsonRpcRequest::new(4, METHOD_CALL_TOOL, Some(json!({"no_name": true})));
        let response = dispatcher.dispatch(&context(), request).await;
        let error = response.error_payload().unwrap();
        assert_eq!(
            error.data.as_ref().unwrap()["error"],
            json!("invalid_mcp_message")
        );
    }
}
