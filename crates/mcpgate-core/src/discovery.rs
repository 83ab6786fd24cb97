//! Tool discovery: the `tools/list` handshake against one upstream.
//!
//! Discovery runs under a 10 s deadline, shorter than the general request
//! timeout: an unresponsive candidate is the common failure mode of a
//! mis-configured stdio command, and aggregation should not stall on it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::model::McpServer;
use crate::pool::Session;
use crate::store::GatewayStore;
use mcpgate_protocol::{
    ErrorKind, GatewayError, GatewayResult, METHOD_LIST_TOOLS, ToolRecord, ToolsListResult,
};

/// Deadline for the discovery handshake.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `tools/list` on a session and normalise the reply into records.
///
/// Tools without a name are dropped with a warning. The records are not yet
/// filtered by overrides; that happens at aggregation.
pub async fn discover_tools(session: &Session, server: &McpServer) -> GatewayResult<Vec<ToolRecord>> {
    let reply = session
        .request(METHOD_LIST_TOOLS, Some(json!({})), DISCOVERY_TIMEOUT)
        .await
        .map_err(|e| {
            if e.kind == ErrorKind::UpstreamTimeout {
                GatewayError::new(
                    ErrorKind::DiscoveryTimeout,
                    format!("tools/list against '{}' timed out", server.name),
                )
                .with_component("discovery")
            } else {
                e.with_component("discovery")
            }
        })?;

    let result = reply.into_result().map_err(|e| {
        GatewayError::new(
            ErrorKind::ProtocolError,
            format!("tools/list against '{}' failed: {e}", server.name),
        )
        .with_component("discovery")
    })?;

    let listed: ToolsListResult = serde_json::from_value(result).map_err(|e| {
        GatewayError::new(
            ErrorKind::ProtocolError,
            format!("tools/list reply from '{}' malformed: {e}", server.name),
        )
        .with_component("discovery")
    })?;

    let mut records = Vec::with_capacity(listed.tools.len());
    for tool in listed.tools {
        if tool.name.trim().is_empty() {
            warn!(server = %server.name, "dropping discovered tool without a name");
            continue;
        }
        records.push(ToolRecord::new(
            &server.id,
            &server.name,
            tool.name,
            tool.description,
            tool.input_schema,
        ));
    }
    Ok(records)
}

/// Discover and persist: replaces the upstream's stored tools atomically.
/// A failed discovery leaves the previous records intact.
pub async fn discover_and_store(
    session: &Session,
    server: &McpServer,
    store: &Arc<dyn GatewayStore>,
) -> GatewayResult<Vec<ToolRecord>> {
    let records = discover_tools(session, server).await?;
    store
        .replace_discovered_tools(&server.id, records.clone())
        .await
        .map_err(|e| e.with_component("discovery"))?;
    Ok(records)
}
