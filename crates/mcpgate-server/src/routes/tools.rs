//! Direct tool invocation over plain HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestCtx;
use crate::routes::mcp::dispatch_context;
use crate::state::GatewayState;
use mcpgate_protocol::{ErrorKind, GatewayError};

/// `GET /tools`: the endpoint's aggregated catalogue.
pub async fn list_tools(
    State(state): State<Arc<GatewayState>>,
    Extension(ctx): Extension<RequestCtx>,
) -> ApiResult<Json<Value>> {
    let dispatch_ctx = dispatch_context(&ctx);
    let tools = state.dispatcher.list_tools(&dispatch_ctx).await?;
    Ok(Json(json!({
        "tools": tools,
        "count": tools.len(),
    })))
}

/// Body of `POST /tools/{tool_name}`.
#[derive(Debug, Deserialize)]
pub struct ToolCallBody {
    /// Arguments keyed by parameter name
    #[serde(default)]
    pub arguments: Option<HashMap<String, Value>>,
}

/// `POST /tools/{tool_name}`: invoke one prefixed tool.
pub async fn call_tool(
    State(state): State<Arc<GatewayState>>,
    Extension(ctx): Extension<RequestCtx>,
    Path(params): Path<HashMap<String, String>>,
    Json(body): Json<ToolCallBody>,
) -> ApiResult<Json<Value>> {
    let tool_name = params.get("tool_name").cloned().ok_or_else(|| {
        ApiError(GatewayError::new(
            ErrorKind::InvalidToolName,
            "missing tool name",
        ))
    })?;
    let dispatch_ctx = dispatch_context(&ctx);
    let result = state
        .dispatcher
        .call_tool(&dispatch_ctx, &tool_name, body.arguments)
        .await?;
    Ok(Json(serde_json::to_value(result).map_err(GatewayError::from)?))
}
