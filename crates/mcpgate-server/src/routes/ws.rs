//! The client-facing WebSocket channel.
//!
//! Text frames carry JSON-RPC; each request frame is dispatched and answered
//! on the same socket, in order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, State};
use axum::response::Response;

use crate::middleware::RequestCtx;
use crate::routes::mcp::dispatch_context;
use crate::state::GatewayState;
use mcpgate_protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, jsonrpc::codes};

/// `GET /ws`: upgrade and serve.
pub async fn handle_ws(
    State(state): State<Arc<GatewayState>>,
    Extension(ctx): Extension<RequestCtx>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| serve_socket(state, ctx, socket))
}

async fn serve_socket(state: Arc<GatewayState>, ctx: RequestCtx, mut socket: WebSocket) {
    tracing::debug!(
        endpoint = %ctx.resolved.endpoint.name,
        session = ?ctx.session_id,
        "websocket channel opened"
    );
    let dispatch_ctx = dispatch_context(&ctx);

    while let Some(frame) = socket.recv().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "websocket read error");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                let response = match serde_json::from_str::<JsonRpcRequest>(text.as_str()) {
                    Ok(request) => state.dispatcher.dispatch(&dispatch_ctx, request).await,
                    Err(e) => JsonRpcResponse::error(
                        None,
                        JsonRpcError::new(codes::INVALID_REQUEST, format!("invalid request: {e}")),
                    ),
                };
                let Ok(serialized) = serde_json::to_string(&response) else {
                    continue;
                };
                if socket.send(Message::Text(serialized.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of the
            // contract.
            _ => {}
        }
    }
    tracing::debug!(endpoint = %ctx.resolved.endpoint.name, "websocket channel closed");
}
