//! The filter plugin contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use mcpgate_protocol::{ErrorKind, GatewayError};

/// Result alias for plugin operations.
pub type FilterResult<T> = Result<T, FilterError>;

/// Failures inside a plugin.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FilterError {
    /// Rejected plugin configuration
    #[error("invalid filter configuration: {0}")]
    Configuration(String),

    /// Failure while processing content
    #[error("filter processing failed: {0}")]
    Processing(String),
}

impl From<FilterError> for GatewayError {
    fn from(err: FilterError) -> Self {
        let kind = match &err {
            FilterError::Configuration(_) => ErrorKind::InvalidConfig,
            FilterError::Processing(_) => ErrorKind::PluginFailure,
        };
        GatewayError::new(kind, err.to_string()).with_component("filter")
    }
}

/// Which way the payload is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterDirection {
    /// Upstream reply flowing back to the client
    Inbound,
    /// Client payload flowing to an upstream
    Outbound,
}

/// What a plugin decided about the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    /// Nothing of note
    Allow,
    /// Record only
    Audit,
    /// Record and surface a warning
    Warn,
    /// Reject the payload
    Block,
}

/// Violation severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Low,
    /// Worth surfacing
    Medium,
    /// Policy-relevant
    High,
    /// Always policy-relevant
    Critical,
}

/// One detected policy violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Violation type, e.g. `pii.email` or `resource.private_network`
    pub kind: String,
    /// Pattern or rule name that fired
    pub pattern: String,
    /// The matched text
    pub matched: String,
    /// Byte offset of the match in the content the plugin saw
    pub position: usize,
    /// Severity
    pub severity: Severity,
    /// Replacement applied, if the plugin rewrote the match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Free-form extras
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// A plugin's verdict on one payload.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Strongest action the plugin requests
    pub action: FilterAction,
    /// True when the payload must be rejected
    pub blocked: bool,
    /// True when `content` carries a rewrite
    pub modified: bool,
    /// Rewritten content, present iff `modified`
    pub content: Option<String>,
    /// Human-readable explanation
    pub reason: Option<String>,
    /// Everything the plugin found
    pub violations: Vec<Violation>,
}

impl FilterOutcome {
    /// Content passes untouched.
    pub fn allow() -> Self {
        Self {
            action: FilterAction::Allow,
            blocked: false,
            modified: false,
            content: None,
            reason: None,
            violations: Vec::new(),
        }
    }

    /// Reject the payload.
    pub fn block(reason: impl Into<String>, violations: Vec<Violation>) -> Self {
        Self {
            action: FilterAction::Block,
            blocked: true,
            modified: false,
            content: None,
            reason: Some(reason.into()),
            violations,
        }
    }

    /// Pass a rewritten payload on.
    pub fn modified(action: FilterAction, content: String, violations: Vec<Violation>) -> Self {
        Self {
            action,
            blocked: false,
            modified: true,
            content: Some(content),
            reason: None,
            violations,
        }
    }

    /// Flag without rewriting.
    pub fn flagged(action: FilterAction, violations: Vec<Violation>) -> Self {
        Self {
            action,
            blocked: false,
            modified: false,
            content: None,
            reason: None,
            violations,
        }
    }
}

/// A content inspector/mutator.
///
/// Plugins are mode-agnostic: the [`crate::ModedPlugin`] decorator rewrites
/// actions according to the configured execution mode after the fact.
#[async_trait]
pub trait FilterPlugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Chain position; lower runs earlier.
    fn priority(&self) -> i32 {
        100
    }

    /// Inspect one payload.
    async fn apply(&self, direction: FilterDirection, content: &str)
    -> FilterResult<FilterOutcome>;
}
