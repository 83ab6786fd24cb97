//! Gateway configuration.

use std::time::Duration;

use clap::Parser;

/// Runtime configuration, populated from flags and environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "mcpgate", about = "Multi-tenant MCP gateway", version)]
pub struct GatewayConfig {
    /// Listen address
    #[arg(long, env = "MCPGATE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: String,

    /// Public base URL used in derived endpoint URLs and OpenAPI documents
    #[arg(long, env = "MCPGATE_BASE_URL", default_value = "http://127.0.0.1:8080")]
    pub base_url: String,

    /// JSON fixture file loaded into the in-memory store
    #[arg(long, env = "MCPGATE_FIXTURE")]
    pub fixture: Option<String>,

    /// JSON file with the content-filter chain specs
    #[arg(long, env = "MCPGATE_FILTERS")]
    pub filters: Option<String>,

    /// Overall request deadline in seconds
    #[arg(long, env = "MCPGATE_REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Global per-IP rate limit (requests per window); 0 disables
    #[arg(long, env = "MCPGATE_GLOBAL_RATE_LIMIT", default_value_t = 300)]
    pub global_rate_limit: u32,

    /// Global rate-limit window in seconds
    #[arg(long, env = "MCPGATE_GLOBAL_RATE_WINDOW", default_value_t = 60)]
    pub global_rate_window_secs: u64,

    /// Endpoint-resolution cache TTL in seconds; 0 means mutation-only
    /// invalidation
    #[arg(long, env = "MCPGATE_ENDPOINT_CACHE_TTL", default_value_t = 300)]
    pub endpoint_cache_ttl_secs: u64,

    /// Close upstream sessions idle longer than this many seconds; 0 disables
    #[arg(long, env = "MCPGATE_SESSION_IDLE_TIMEOUT", default_value_t = 0)]
    pub session_idle_timeout_secs: u64,

    /// OAuth issuer advertised in OpenAPI security schemes
    #[arg(long, env = "MCPGATE_OAUTH_ISSUER")]
    pub oauth_issuer: Option<String>,

    /// The gateway terminates TLS (enables HSTS)
    #[arg(long, env = "MCPGATE_TLS", default_value_t = false)]
    pub tls: bool,
}

impl GatewayConfig {
    /// Defaults without parsing the process arguments; used by tests.
    pub fn for_tests() -> Self {
        Self::parse_from(["mcpgate"])
    }

    /// The overall request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Endpoint cache TTL, `None` when mutation-only.
    pub fn endpoint_cache_ttl(&self) -> Option<Duration> {
        (self.endpoint_cache_ttl_secs > 0)
            .then(|| Duration::from_secs(self.endpoint_cache_ttl_secs))
    }

    /// Session idle threshold, `None` when the reaper is disabled.
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.session_idle_timeout_secs))
    }
}
