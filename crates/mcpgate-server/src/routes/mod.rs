//! Router assembly.
//!
//! Global stack, outermost first: panic recovery, security headers, global
//! IP rate limit, request timeout. The per-endpoint pipeline is layered on
//! the nested endpoint router so its path rewrite runs before that router
//! matches.

pub mod mcp;
pub mod sse;
pub mod tools;
pub mod ws;

use std::any::Any;
use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Router, body::Body};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;

use crate::error::ApiResult;
use crate::middleware::security::SecurityHeaders;
use crate::middleware::{RequestCtx, endpoint_pipeline, global_rate_limit, security_headers};
use crate::openapi;
use crate::state::GatewayState;
use mcpgate_core::EndpointResolver;

/// Stage 1: opaque 500 for anything that panicked further in.
fn handle_panic(_err: Box<dyn Any + Send + 'static>) -> http::Response<Body> {
    tracing::error!("request handler panicked");
    let body = serde_json::to_string(&json!({
        "error": "internal_error",
        "message": "internal server error",
    }))
    .unwrap_or_default();
    http::Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_default()
}

/// Build the public router.
pub fn app(state: Arc<GatewayState>) -> Router {
    let endpoint_routes = Router::new()
        .route("/mcp", post(mcp::handle_mcp))
        .route("/mcp/{*rest}", post(mcp::handle_mcp))
        .route("/rpc", post(mcp::handle_mcp))
        .route("/rpc/{*rest}", post(mcp::handle_mcp))
        .route("/sse", get(sse::handle_sse))
        .route("/ws", get(ws::handle_ws))
        .route("/tools", get(tools::list_tools))
        .route("/tools/{tool_name}", post(tools::call_tool))
        .route("/api/openapi.json", get(openapi_document))
        .route("/api/docs", get(docs_page))
        .with_state(Arc::clone(&state));

    // The pipeline wraps the endpoint router as a whole: its path rewrite
    // must run before that router matches, which `Router::layer` (applied
    // after routing) cannot do.
    let piped_endpoints = tower::Layer::layer(
        &from_fn_with_state(Arc::clone(&state), endpoint_pipeline),
        endpoint_routes,
    );

    let security = Arc::new(SecurityHeaders::new(state.config.tls, &[]));

    Router::new()
        .route("/health", get(health))
        .nest_service("/api/public/endpoints/{endpoint_name}", piped_endpoints)
        .fallback(not_found)
        .with_state(Arc::clone(&state))
        // Stage 4: request deadline.
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        // Stage 3: global per-IP limit.
        .layer(from_fn_with_state(Arc::clone(&state), global_rate_limit))
        // Stage 2: security headers.
        .layer(from_fn_with_state(security, security_headers))
        // Stage 1: recovery, outermost.
        .layer(CatchPanicLayer::custom(handle_panic))
}

/// Liveness probe; bypasses rate limiting.
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": "mcpgate"}))
}

/// OpenAPI 3.0 document for one endpoint.
async fn openapi_document(
    State(state): State<Arc<GatewayState>>,
    Extension(ctx): Extension<RequestCtx>,
) -> ApiResult<Json<serde_json::Value>> {
    let dispatch_ctx = mcp::dispatch_context(&ctx);
    let tools = state.dispatcher.list_tools(&dispatch_ctx).await?;
    let document = openapi::document(
        &ctx.resolved.endpoint,
        &tools,
        &state.config.base_url,
        state.config.oauth_issuer.as_deref(),
    );
    Ok(Json(document))
}

/// Interactive docs: a thin page delegating to an external UI collaborator.
async fn docs_page(
    State(state): State<Arc<GatewayState>>,
    Extension(ctx): Extension<RequestCtx>,
) -> Html<String> {
    let urls = EndpointResolver::public_urls(&state.config.base_url, &ctx.resolved.endpoint.name);
    Html(format!(
        r#"<!doctype html>
<html>
<head><title>{name} API</title>
<script type="module" src="https://unpkg.com/rapidoc/dist/rapidoc-min.js"></script>
</head>
<body>
<rapi-doc spec-url="{spec}" render-style="read"></rapi-doc>
</body>
</html>"#,
        name = ctx.resolved.endpoint.name,
        spec = urls.openapi,
    ))
}

/// 404 body matching the error shape; axum's default is empty.
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "endpoint_not_found", "message": "no such route"})),
    )
        .into_response()
}
