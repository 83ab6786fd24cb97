//! The streamable-HTTP / JSON-RPC channel.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use crate::middleware::RequestCtx;
use crate::state::GatewayState;
use mcpgate_core::DispatchContext;
use mcpgate_protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, jsonrpc::codes};

/// Dispatch context from what the pipeline established.
pub fn dispatch_context(ctx: &RequestCtx) -> DispatchContext {
    DispatchContext {
        endpoint: ctx.resolved.endpoint.clone(),
        namespace: ctx.resolved.namespace.clone(),
        server_hint: ctx.server_id.clone(),
    }
}

/// `POST /mcp` and `POST /rpc`: one MCP message in, one reply out.
///
/// Notifications (frames without an id) are acknowledged with 202 and no
/// body, matching the streamable-HTTP contract.
pub async fn handle_mcp(
    State(state): State<Arc<GatewayState>>,
    Extension(ctx): Extension<RequestCtx>,
    body: Bytes,
) -> Response {
    let frame: Value = match serde_json::from_slice(&body) {
        Ok(frame) => frame,
        Err(e) => {
            let error = JsonRpcError::new(codes::PARSE_ERROR, format!("invalid JSON: {e}"));
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(None, error)),
            )
                .into_response();
        }
    };

    if frame.get("id").is_none() {
        tracing::debug!(endpoint = %ctx.resolved.endpoint.name, "acknowledging notification");
        return StatusCode::ACCEPTED.into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_value(frame) {
        Ok(request) => request,
        Err(e) => {
            let error = JsonRpcError::new(codes::INVALID_REQUEST, format!("invalid request: {e}"));
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(None, error)),
            )
                .into_response();
        }
    };

    let dispatch_ctx = dispatch_context(&ctx);
    let response = state.dispatcher.dispatch(&dispatch_ctx, request).await;
    Json(response).into_response()
}
