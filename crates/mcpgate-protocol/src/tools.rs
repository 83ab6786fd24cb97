//! Discovered-tool records and the prefixed-name scheme.
//!
//! Within a namespace every tool is published under
//! `<sanitised-upstream-name>__<raw-name>`; the sanitiser maps anything
//! outside `[A-Za-z0-9_-]` to `_` so the prefix survives URL and JSON use.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between the sanitised upstream name and the raw tool name.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Compose the namespace-visible tool name.
pub fn prefixed_tool_name(upstream_name: &str, raw_name: &str) -> String {
    format!("{}{}{}", sanitize_name(upstream_name), TOOL_NAME_SEPARATOR, raw_name)
}

/// Split a prefixed name at the first `__`.
///
/// Returns `None` when the separator is absent or either half is empty.
pub fn split_prefixed_name(prefixed: &str) -> Option<(&str, &str)> {
    let (prefix, raw) = prefixed.split_once(TOOL_NAME_SEPARATOR)?;
    if prefix.is_empty() || raw.is_empty() {
        return None;
    }
    Some((prefix, raw))
}

/// Advisory category assigned during discovery. Never affects routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    /// File and directory access
    File,
    /// Web and HTTP access
    Web,
    /// Databases and queries
    Data,
    /// Shell and process execution
    System,
    /// Model inference
    Ai,
    /// Everything else
    General,
}

impl ToolCategory {
    /// Categorise by name substring.
    pub fn from_tool_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
        if contains_any(&["file", "read", "write", "directory"]) {
            Self::File
        } else if contains_any(&["http", "web", "fetch", "request"]) {
            Self::Web
        } else if contains_any(&["db", "database", "sql", "query"]) {
            Self::Data
        } else if contains_any(&["system", "exec", "command", "shell"]) {
            Self::System
        } else if contains_any(&["ai", "ml", "model", "predict"]) {
            Self::Ai
        } else {
            Self::General
        }
    }
}

/// One discovered tool, as stored and as returned by aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Id of the upstream that published the tool
    pub server_id: String,
    /// Upstream display name (unsanitised)
    pub server_name: String,
    /// Name as published by the upstream
    pub raw_name: String,
    /// Namespace-visible name (`sanitize(server_name) + "__" + raw_name`)
    pub prefixed_name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Argument schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Advisory category
    pub category: ToolCategory,
    /// False when hidden by a per-namespace override
    pub active: bool,
}

impl ToolRecord {
    /// Build a record from a published tool, prefixing the name.
    pub fn new(
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        raw_name: impl Into<String>,
        description: Option<String>,
        input_schema: Option<Value>,
    ) -> Self {
        let server_id = server_id.into();
        let server_name = server_name.into();
        let raw_name = raw_name.into();
        let prefixed_name = prefixed_tool_name(&server_name, &raw_name);
        let category = ToolCategory::from_tool_name(&raw_name);
        Self {
            server_id,
            server_name,
            raw_name,
            prefixed_name,
            description,
            input_schema,
            category,
            active: true,
        }
    }
}
