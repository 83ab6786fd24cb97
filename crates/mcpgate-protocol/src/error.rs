//! The gateway error taxonomy.
//!
//! Every layer speaks `GatewayError`: lower layers create one with the kind
//! that describes the failure, intermediate layers enrich it with component
//! context, and only the HTTP surface translates the kind into a status code
//! and wire body. Kinds are stable; messages are not.

use serde_json::{Value, json};
use std::fmt;

/// Result alias used across the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Classified failure kinds, aligned with the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // ---- input ----
    /// Malformed or empty endpoint name
    InvalidEndpointName,
    /// Tool name missing the prefix separator, or with an empty half
    InvalidToolName,
    /// Request body is not a valid MCP message
    InvalidMessage,
    /// Rejected entity or transport configuration
    InvalidConfig,
    // ---- auth ----
    /// No credentials supplied to a non-public endpoint
    MissingCredentials,
    /// Credentials supplied but rejected
    InvalidCredentials,
    /// Endpoint exists but is deactivated
    InactiveEndpoint,
    /// Token valid but lacks a required scope
    ScopeDenied,
    // ---- routing ----
    /// No endpoint with the requested name
    EndpointNotFound,
    /// Endpoint references a namespace that no longer exists
    NamespaceNotFound,
    /// No tool with the requested prefixed name
    ToolNotFound,
    /// The target upstream link is inactive
    UpstreamInactive,
    /// Direct tool call in a multi-upstream namespace without a server hint
    AmbiguousTarget,
    // ---- capacity ----
    /// Fixed-window rate limit exceeded
    RateLimited,
    // ---- timeouts ----
    /// The overall request deadline elapsed
    RequestTimeout,
    /// `tools/list` handshake exceeded the discovery deadline
    DiscoveryTimeout,
    /// Upstream did not answer within its configured timeout
    UpstreamTimeout,
    // ---- upstream ----
    /// Connection to the upstream was refused
    ConnectRefused,
    /// Upstream replied with something that is not MCP
    ProtocolError,
    /// Upstream closed the connection (child exit, stream end)
    UpstreamClosed,
    /// I/O failure on the wire
    WireError,
    /// The request context was cancelled
    Cancelled,
    // ---- policy ----
    /// A content filter blocked the payload
    PolicyBlock,
    // ---- internal ----
    /// Persistence collaborator failure
    PersistenceFailure,
    /// A filter plugin panicked or errored
    PluginFailure,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Snake-case code used in the JSON error body.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidEndpointName => "invalid_endpoint_name",
            Self::InvalidToolName => "invalid_tool_name",
            Self::InvalidMessage => "invalid_mcp_message",
            Self::InvalidConfig => "invalid_config",
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidCredentials => "invalid_credentials",
            Self::InactiveEndpoint => "inactive_endpoint",
            Self::ScopeDenied => "scope_denied",
            Self::EndpointNotFound => "endpoint_not_found",
            Self::NamespaceNotFound => "namespace_not_found",
            Self::ToolNotFound => "tool_not_found",
            Self::UpstreamInactive => "upstream_inactive",
            Self::AmbiguousTarget => "ambiguous_target",
            Self::RateLimited => "rate_limit_exceeded",
            Self::RequestTimeout => "request_timeout",
            Self::DiscoveryTimeout => "discovery_timeout",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::ConnectRefused => "connect_refused",
            Self::ProtocolError => "protocol_error",
            Self::UpstreamClosed => "upstream_closed",
            Self::WireError => "wire_error",
            Self::Cancelled => "cancelled",
            Self::PolicyBlock => "policy_block",
            Self::PersistenceFailure => "persistence_failure",
            Self::PluginFailure => "plugin_failure",
            Self::Internal => "internal_error",
        }
    }

    /// HTTP status class for the outermost translation layer.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidEndpointName
            | Self::InvalidToolName
            | Self::InvalidMessage
            | Self::InvalidConfig
            | Self::AmbiguousTarget => 400,
            Self::MissingCredentials | Self::InvalidCredentials | Self::InactiveEndpoint => 401,
            Self::ScopeDenied | Self::PolicyBlock => 403,
            Self::EndpointNotFound
            | Self::NamespaceNotFound
            | Self::ToolNotFound
            | Self::UpstreamInactive => 404,
            Self::RequestTimeout => 408,
            Self::RateLimited => 429,
            Self::ConnectRefused
            | Self::ProtocolError
            | Self::UpstreamClosed
            | Self::WireError => 502,
            Self::DiscoveryTimeout | Self::UpstreamTimeout => 504,
            Self::Cancelled | Self::PersistenceFailure | Self::PluginFailure | Self::Internal => {
                500
            }
        }
    }

    /// Whether the dispatcher may retry an idempotent operation.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RequestTimeout
                | Self::DiscoveryTimeout
                | Self::UpstreamTimeout
                | Self::ConnectRefused
                | Self::UpstreamClosed
                | Self::WireError
        )
    }
}

/// The error type carried between gateway layers.
#[derive(Debug, Clone)]
pub struct GatewayError {
    /// Failure class
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional detail exposed in the wire body
    pub details: Option<Value>,
    /// Component trail, outermost last
    pub components: Vec<&'static str>,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            write!(f, "{}: {}", self.kind.code(), self.message)
        } else {
            write!(
                f,
                "{} [{}]: {}",
                self.kind.code(),
                self.components.join("/"),
                self.message
            )
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Build an error from a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            components: Vec::new(),
        }
    }

    /// Record which component observed the failure.
    pub fn with_component(mut self, component: &'static str) -> Self {
        self.components.push(component);
        self
    }

    /// Attach wire-visible detail.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The JSON error body served by the HTTP surface.
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "error": self.kind.code(),
            "message": self.message,
        });
        if let Some(details) = &self.details {
            body["details"] = details.clone();
        }
        body
    }

    // Shorthand constructors for the common kinds.

    /// `invalid_tool_name`
    pub fn invalid_tool_name(name: &str) -> Self {
        Self::new(
            ErrorKind::InvalidToolName,
            format!("tool name '{name}' is not of the form <server>__<tool>"),
        )
    }

    /// `endpoint_not_found`
    pub fn endpoint_not_found(name: &str) -> Self {
        Self::new(ErrorKind::EndpointNotFound, format!("no endpoint named '{name}'"))
    }

    /// `tool_not_found`
    pub fn tool_not_found(name: &str) -> Self {
        Self::new(ErrorKind::ToolNotFound, format!("no tool named '{name}'"))
    }

    /// `persistence_failure`
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PersistenceFailure, message)
    }

    /// `internal_error`
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidMessage, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_classes_match_code_classes() {
        assert_eq!(ErrorKind::InvalidToolName.http_status(), 400);
        assert_eq!(ErrorKind::MissingCredentials.http_status(), 401);
        assert_eq!(ErrorKind::PolicyBlock.http_status(), 403);
        assert_eq!(ErrorKind::ToolNotFound.http_status(), 404);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::UpstreamTimeout.http_status(), 504);
        assert_eq!(ErrorKind::WireError.http_status(), 502);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn component_trail_shows_in_display() {
        let err = GatewayError::new(ErrorKind::WireError, "broken pipe")
            .with_component("transport")
            .with_component("pool");
        assert_eq!(err.to_string(), "wire_error [transport/pool]: broken pipe");
    }

    #[test]
    fn body_carries_optional_details() {
        let err = GatewayError::new(ErrorKind::PolicyBlock, "content blocked")
            .with_details(json!({"violations": 2}));
        let body = err.to_body();
        assert_eq!(body["error"], json!("policy_block"));
        assert_eq!(body["details"]["violations"], json!(2));
    }

    #[test]
    fn retryable_kinds_are_timeout_and_upstream() {
        assert!(ErrorKind::UpstreamTimeout.is_retryable());
        assert!(ErrorKind::ConnectRefused.is_retryable());
        assert!(!ErrorKind::PolicyBlock.is_retryable());
        assert!(!ErrorKind::RateLimited.is_retryable());
    }
}
