//! The request-processing pipeline.
//!
//! Stage order, outermost first: panic recovery, security headers, global IP
//! rate limit, request timeout, then — per endpoint — lookup, auth, endpoint
//! rate limit, endpoint CORS, path rewrite, transport tagging and session-id
//! handling. Each stage may short-circuit with a response or annotate the
//! request context and pass through.

pub mod auth;
pub mod pipeline;
pub mod rate;
pub mod rewrite;
pub mod security;

use std::sync::Arc;

use mcpgate_core::{ApiKeyIdentity, OauthIdentity, ResolvedEndpoint};

pub use auth::authenticate;
pub use pipeline::endpoint_pipeline;
pub use rate::{client_ip, global_rate_limit, rate_limited_response};
pub use rewrite::{RewriteOutcome, RewriteRule, RewriteTable};
pub use security::{SecurityHeaders, security_headers};

/// Who the request is.
#[derive(Debug, Clone)]
pub enum AuthIdentity {
    /// Public endpoint, no credentials checked
    Anonymous,
    /// Established via API key
    ApiKey(ApiKeyIdentity),
    /// Established via OAuth bearer token
    Oauth(OauthIdentity),
}

impl AuthIdentity {
    /// Owning organization, when authenticated.
    pub fn org(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::ApiKey(identity) => Some(&identity.org),
            Self::Oauth(identity) => Some(&identity.org),
        }
    }
}

/// Transport classification by path prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportClass {
    /// Plain request/response JSON-RPC
    Http,
    /// Server-sent events
    Sse,
    /// WebSocket
    WebSocket,
    /// Stdio bridging
    Stdio,
    /// Streamable HTTP
    Streamable,
}

impl TransportClass {
    /// Classify by the first path segment.
    pub fn from_path(path: &str) -> Self {
        match path.trim_start_matches('/').split('/').next() {
            Some("sse") => Self::Sse,
            Some("ws") => Self::WebSocket,
            Some("stdio") => Self::Stdio,
            Some("mcp") => Self::Streamable,
            // `/rpc` and everything else is plain HTTP.
            _ => Self::Http,
        }
    }

    /// Stateful transports carry a session id.
    pub fn is_stateful(self) -> bool {
        matches!(self, Self::Sse | Self::WebSocket | Self::Streamable)
    }
}

/// What the pipeline established about a request; handlers read this from
/// the request extensions.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    /// Resolved endpoint and namespace
    pub resolved: Arc<ResolvedEndpoint>,
    /// Authenticated principal
    pub auth: AuthIdentity,
    /// Upstream nominated by path rewrite
    pub server_id: Option<String>,
    /// Pre-rewrite path, when a rewrite applied
    pub original_path: Option<String>,
    /// Guard against re-evaluating rewrite rules
    pub rewritten: bool,
    /// Transport classification
    pub transport: TransportClass,
    /// Session identity for stateful transports
    pub session_id: Option<String>,
}
