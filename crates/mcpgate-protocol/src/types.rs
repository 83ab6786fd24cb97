//! The MCP subset the gateway speaks.
//!
//! Only the handshake and the tool surface are modelled; everything else an
//! upstream sends is proxied opaquely as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// `initialize` request method.
pub const METHOD_INITIALIZE: &str = "initialize";
/// `notifications/initialized` notification method.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// `tools/list` request method.
pub const METHOD_LIST_TOOLS: &str = "tools/list";
/// `tools/call` request method.
pub const METHOD_CALL_TOOL: &str = "tools/call";

/// Protocol revision advertised during `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// A tool as published by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name, unique within its server
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool arguments
    #[serde(rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl Tool {
    /// Build a tool with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach an input schema.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// Result payload of `tools/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsListResult {
    /// Published tools
    pub tools: Vec<Tool>,
    /// Pagination cursor; the gateway never paginates but upstreams may
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments keyed by parameter name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<HashMap<String, Value>>,
}

/// One block of tool-call output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// The text payload
        text: String,
    },
    /// Embedded JSON or other structured data rendered as text by clients
    Resource {
        /// Resource body
        resource: Value,
    },
}

impl ContentBlock {
    /// Text block helper.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result payload of `tools/call`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Output blocks
    pub content: Vec<ContentBlock>,
    /// True when the call failed tool-side (as opposed to transport-side)
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    /// Failed result carrying an explanation.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }
}
