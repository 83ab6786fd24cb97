//! Tenant data model.
//!
//! These records are owned by the persistence collaborator; the core only
//! validates and consumes them. Identifiers are opaque strings assigned by
//! whoever owns the store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use mcpgate_protocol::{ErrorKind, GatewayError, GatewayResult};
use mcpgate_transport::TransportConfig;

/// Names for namespaces and endpoints: 3-50 characters of `[A-Za-z0-9_-]`.
pub fn validate_entity_name(name: &str) -> GatewayResult<()> {
    if name.len() < 3 || name.len() > 50 {
        return Err(GatewayError::new(
            ErrorKind::InvalidConfig,
            format!("name '{name}' must be 3-50 characters, got {}", name.len()),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(GatewayError::new(
            ErrorKind::InvalidConfig,
            format!("name '{name}' contains characters outside [A-Za-z0-9_-]"),
        ));
    }
    Ok(())
}

/// Wire protocol of an upstream server record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Locally spawned subprocess
    Stdio,
    /// Streamable HTTP
    Http,
    /// Streamable HTTP over TLS
    Https,
    /// WebSocket
    Ws,
    /// WebSocket over TLS
    Wss,
    /// Server-sent events
    Sse,
}

impl Protocol {
    fn requires_url(self) -> bool {
        !matches!(self, Self::Stdio)
    }
}

/// An upstream MCP server as described by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    /// Store-assigned identifier
    pub id: String,
    /// Owning organization
    pub org: String,
    /// Display name; sanitised into tool prefixes
    pub name: String,
    /// Wire protocol
    pub protocol: Protocol,
    /// Endpoint URL; required unless `protocol` is stdio
    #[serde(default)]
    pub url: Option<String>,
    /// SSE companion send URL override
    #[serde(default)]
    pub send_url: Option<String>,
    /// Command to spawn; required when `protocol` is stdio
    #[serde(default)]
    pub command: Option<String>,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment injected into the child
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the child
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Extra headers for network transports
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Bearer token for network transports
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry budget for idempotent operations
    #[serde(default)]
    pub max_retries: u32,
    /// Liveness probe URL
    #[serde(default)]
    pub health_check_url: Option<String>,
    /// Inactive servers are skipped by aggregation
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl McpServer {
    /// Check the protocol/url/command coupling and the health-check scheme
    /// family.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.protocol.requires_url() && self.url.is_none() {
            return Err(GatewayError::new(
                ErrorKind::InvalidConfig,
                format!("server '{}': protocol requires a url", self.name),
            ));
        }
        if self.protocol == Protocol::Stdio && self.command.is_none() {
            return Err(GatewayError::new(
                ErrorKind::InvalidConfig,
                format!("server '{}': stdio protocol requires a command", self.name),
            ));
        }
        if let (Some(url), Some(health)) = (&self.url, &self.health_check_url) {
            let url_secure = url.starts_with("https://") || url.starts_with("wss://");
            let health_secure = health.starts_with("https://");
            if !health.starts_with("http://") && !health.starts_with("https://") {
                return Err(GatewayError::new(
                    ErrorKind::InvalidConfig,
                    format!("server '{}': health check url must be http(s)", self.name),
                ));
            }
            if url_secure != health_secure {
                return Err(GatewayError::new(
                    ErrorKind::InvalidConfig,
                    format!(
                        "server '{}': health check scheme does not match url scheme family",
                        self.name
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Build the driver configuration for this record.
    pub fn transport_config(&self) -> GatewayResult<TransportConfig> {
        self.validate()?;
        let config = match self.protocol {
            Protocol::Stdio => TransportConfig::Stdio {
                command: self.command.clone().unwrap_or_default(),
                args: self.args.clone(),
                env: self.env.clone(),
                working_dir: self.working_dir.clone(),
            },
            Protocol::Http | Protocol::Https => TransportConfig::Streamable {
                url: self.url.clone().unwrap_or_default(),
                headers: self.headers.clone(),
                auth_token: self.auth_token.clone(),
            },
            Protocol::Sse => TransportConfig::Sse {
                url: self.url.clone().unwrap_or_default(),
                send_url: self.send_url.clone(),
                headers: self.headers.clone(),
                auth_token: self.auth_token.clone(),
            },
            Protocol::Ws | Protocol::Wss => TransportConfig::WebSocket {
                url: self.url.clone().unwrap_or_default(),
                headers: self.headers.clone(),
            },
        };
        Ok(config)
    }
}

/// Membership status of a namespace-server link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Participates in aggregation
    Active,
    /// Ignored by the aggregator; sessions evicted
    Inactive,
}

/// One edge between a namespace and an upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceServer {
    /// Upstream (or virtual server) id
    pub server_id: String,
    /// Membership status
    #[serde(default = "default_link_status")]
    pub status: LinkStatus,
    /// Ordering priority; lower wins ties
    #[serde(default)]
    pub priority: i32,
}

fn default_link_status() -> LinkStatus {
    LinkStatus::Active
}

/// A named set of upstream servers presented as one catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    /// Store-assigned identifier
    pub id: String,
    /// Owning organization
    pub org: String,
    /// Unique per organization, 3-50 chars of `[A-Za-z0-9_-]`
    pub name: String,
    /// Inactive namespaces reject traffic
    #[serde(default = "default_true")]
    pub active: bool,
    /// Member edges
    #[serde(default)]
    pub servers: Vec<NamespaceServer>,
}

impl Namespace {
    /// Validate the namespace name.
    pub fn validate(&self) -> GatewayResult<()> {
        validate_entity_name(&self.name)
    }

    /// Active links sorted by (priority, server id) — the aggregation order.
    pub fn active_links(&self) -> Vec<&NamespaceServer> {
        let mut links: Vec<&NamespaceServer> = self
            .servers
            .iter()
            .filter(|link| link.status == LinkStatus::Active)
            .collect();
        links.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.server_id.cmp(&b.server_id))
        });
        links
    }
}

/// Auth modes accepted by an endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointAuth {
    /// Accept API keys (`X-API-Key` / bearer)
    #[serde(default)]
    pub api_key: bool,
    /// Accept OAuth bearer tokens
    #[serde(default)]
    pub oauth: bool,
    /// No credentials required
    #[serde(default)]
    pub public: bool,
    /// Also read the key from `?api_key=`
    #[serde(default)]
    pub use_query_param: bool,
}

/// Fixed-window rate limit attached to an endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndpointRateLimit {
    /// Requests allowed per window
    pub requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

/// Per-endpoint CORS policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointCors {
    /// Allowed origins; `*` allows any
    #[serde(default)]
    pub origins: Vec<String>,
    /// Allowed methods
    #[serde(default)]
    pub methods: Vec<String>,
}

/// The public-facing URL prefix binding a name to a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Store-assigned identifier
    pub id: String,
    /// Owning organization
    pub org: String,
    /// Globally unique (it lives in the public URL space)
    pub name: String,
    /// Bound namespace
    pub namespace_id: String,
    /// Accepted auth modes
    #[serde(default)]
    pub auth: EndpointAuth,
    /// Optional fixed-window rate limit
    #[serde(default)]
    pub rate_limit: Option<EndpointRateLimit>,
    /// Optional CORS policy
    #[serde(default)]
    pub cors: Option<EndpointCors>,
    /// Inactive endpoints reject traffic
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Endpoint {
    /// Name charset plus the "at least one auth mode or public" rule.
    pub fn validate(&self) -> GatewayResult<()> {
        validate_entity_name(&self.name)?;
        if !self.auth.public && !self.auth.api_key && !self.auth.oauth {
            return Err(GatewayError::new(
                ErrorKind::InvalidConfig,
                format!(
                    "endpoint '{}': at least one auth mode must be enabled unless public",
                    self.name
                ),
            ));
        }
        Ok(())
    }
}

/// Per-namespace tool visibility override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOverride {
    /// Namespace the override applies to
    pub namespace_id: String,
    /// Upstream that publishes the tool
    pub server_id: String,
    /// Unprefixed tool name
    pub raw_name: String,
    /// Override status; inactive hides the tool
    pub status: LinkStatus,
}

/// Bearer auth for a REST recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeAuth {
    /// Currently only `bearer` is understood
    #[serde(rename = "type")]
    pub auth_type: String,
    /// Literal token or a `${SECRET:NAME}` reference
    pub token: String,
}

/// Outbound REST call recipe backing a virtual tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestRecipe {
    /// HTTP method
    pub method: String,
    /// Target URL
    pub url: String,
    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Maps body fields to argument names for POST/PUT
    #[serde(default)]
    pub body_map: HashMap<String, String>,
    /// Optional bearer auth
    #[serde(default)]
    pub auth: Option<RecipeAuth>,
    /// Call timeout; 30 s when unset
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One tool published by a virtual server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualToolDef {
    /// Tool name
    pub name: String,
    /// Description shown in the catalogue
    #[serde(default)]
    pub description: Option<String>,
    /// Argument schema
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    /// The REST call this tool performs
    pub recipe: RestRecipe,
}

/// A synthetic upstream whose tools are REST call recipes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualServer {
    /// Store-assigned identifier
    pub id: String,
    /// Owning organization
    pub org: String,
    /// Display name; sanitised into tool prefixes
    pub name: String,
    /// Published tools
    #[serde(default)]
    pub tools: Vec<VirtualToolDef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_transport::TransportKind;
    use pretty_assertions::assert_eq;

    fn server(protocol: Protocol) -> McpServer {
        McpServer {
            id: "srv-1".into(),
            org: "org-1".into(),
            name: "srv-a".into(),
            protocol,
            url: None,
            send_url: None,
            command: None,
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            headers: HashMap::new(),
            auth_token: None,
            timeout_secs: 30,
            max_retries: 0,
            health_check_url: None,
            active: true,
        }
    }

    #[test]
    fn entity_names_validate_length_and_charset() {
        assert!(validate_entity_name("ab").is_err());
        assert!(validate_entity_name("abc").is_ok());
        assert!(validate_entity_name(&"a".repeat(50)).is_ok());
        assert!(validate_entity_name(&"a".repeat(51)).is_err());
        assert!(validate_entity_name("has space").is_err());
        assert!(validate_entity_name("ok_name-2").is_ok());
    }

    #[test]
    fn network_protocols_require_url() {
        let mut s = server(Protocol::Https);
        assert!(s.validate().is_err());
        s.url = Some("https://example.com/mcp".into());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn stdio_requires_command() {
        let mut s = server(Protocol::Stdio);
        assert!(s.validate().is_err());
        s.command = Some("mcp-server".into());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn health_check_scheme_family_must_match() {
        let mut s = server(Protocol::Https);
        s.url = Some("https://example.com/mcp".into());
        s.health_check_url = Some("http://example.com/health".into());
        assert!(s.validate().is_err());
        s.health_check_url = Some("https://example.com/health".into());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn transport_config_maps_protocols() {
        let mut s = server(Protocol::Sse);
        s.url = Some("https://example.com/events".into());
        assert_eq!(s.transport_config().unwrap().kind(), TransportKind::Sse);

        let mut s = server(Protocol::Wss);
        s.url = Some("wss://example.com/mcp".into());
        assert_eq!(
            s.transport_config().unwrap().kind(),
            TransportKind::WebSocket
        );

        let mut s = server(Protocol::Http);
        s.url = Some("http://example.com/mcp".into());
        assert_eq!(
            s.transport_config().unwrap().kind(),
            TransportKind::Streamable
        );
    }

    #[test]
    fn endpoint_needs_an_auth_mode_or_public() {
        let endpoint = Endpoint {
            id: "ep-1".into(),
            org: "org-1".into(),
            name: "demo".into(),
            namespace_id: "ns-1".into(),
            auth: EndpointAuth::default(),
            rate_limit: None,
            cors: None,
            active: true,
        };
        assert!(endpoint.validate().is_err());

        let mut public = endpoint.clone();
        public.auth.public = true;
        assert!(public.validate().is_ok());

        let mut keyed = endpoint;
        keyed.auth.api_key = true;
        assert!(keyed.validate().is_ok());
    }

    #[test]
    fn active_links_sort_by_priority_then_id() {
        let ns = Namespace {
            id: "ns-1".into(),
            org: "org-1".into(),
            name: "ns1".into(),
            active: true,
            servers: vec![
                NamespaceServer {
                    server_id: "srv-b".into(),
                    status: LinkStatus::Active,
                    priority: 1,
                },
                NamespaceServer {
                    server_id: "srv-c".into(),
                    status: LinkStatus::Inactive,
                    priority: 0,
                },
                NamespaceServer {
                    server_id: "srv-a".into(),
                    status: LinkStatus::Active,
                    priority: 1,
                },
                NamespaceServer {
                    server_id: "srv-d".into(),
                    status: LinkStatus::Active,
                    priority: 0,
                },
            ],
        };
        let order: Vec<&str> = ns
            .active_links()
            .iter()
            .map(|l| l.server_id.as_str())
            .collect();
        assert_eq!(order, vec!["srv-d", "srv-a", "srv-b"]);
    }
}
