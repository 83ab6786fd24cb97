//! Wire-level types shared across the gateway.
//!
//! This crate holds the JSON-RPC 2.0 message shapes, the subset of MCP the
//! gateway speaks (`initialize`, `tools/list`, `tools/call`), the discovered
//! tool record with its name sanitiser, and the kind-based error type every
//! layer enriches and the HTTP surface finally translates.

pub mod error;
pub mod jsonrpc;
pub mod tools;
pub mod types;

pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use jsonrpc::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JsonRpcResponsePayload,
    JsonRpcVersion, RequestId,
};
pub use tools::{ToolCategory, ToolRecord, prefixed_tool_name, sanitize_name, split_prefixed_name};
pub use types::{
    CallToolParams, CallToolResult, ContentBlock, METHOD_CALL_TOOL, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_LIST_TOOLS, Tool, ToolsListResult,
};
