//! Resource-URL validation.
//!
//! Extracts `http(s)://` URLs from content and enforces protocol, domain,
//! private-network and localhost policy. Also carries the content-size cap
//! and the content-type allow/block lists the HTTP surface consults.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::plugin::{
    FilterAction, FilterDirection, FilterOutcome, FilterPlugin, FilterResult, Severity, Violation,
};

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("url pattern"));

/// Hostnames that count as localhost.
const LOCALHOST_NAMES: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// Typed configuration, decoded once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceFilterConfig {
    /// Protocols URLs may use
    #[serde(default = "default_protocols")]
    pub allowed_protocols: Vec<String>,
    /// Allow-list of domains (supports `*.domain`); empty allows any
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Block-list of domains (supports `*.domain`)
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    /// Reject URLs resolving into RFC1918 space
    #[serde(default = "default_true")]
    pub block_private_networks: bool,
    /// Permit localhost targets
    #[serde(default)]
    pub allow_localhost: bool,
    /// Reject payloads larger than this many bytes
    #[serde(default)]
    pub max_content_size: Option<usize>,
    /// Content types the surface accepts; empty allows any
    #[serde(default)]
    pub allowed_content_types: Vec<String>,
    /// Content types the surface rejects
    #[serde(default)]
    pub blocked_content_types: Vec<String>,
}

fn default_protocols() -> Vec<String> {
    vec!["http".into(), "https".into()]
}

fn default_true() -> bool {
    true
}

impl Default for ResourceFilterConfig {
    fn default() -> Self {
        Self {
            allowed_protocols: default_protocols(),
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            block_private_networks: true,
            allow_localhost: false,
            max_content_size: None,
            allowed_content_types: Vec::new(),
            blocked_content_types: Vec::new(),
        }
    }
}

/// The resource plugin.
pub struct ResourceFilter {
    config: ResourceFilterConfig,
}

impl ResourceFilter {
    /// Build from a typed config.
    pub fn new(config: ResourceFilterConfig) -> Self {
        Self { config }
    }

    /// `type/subtype` with parameters stripped and lower-cased.
    pub fn normalize_content_type(content_type: &str) -> String {
        content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    }

    /// Whether the surface should accept a payload of this content type.
    pub fn content_type_allowed(&self, content_type: &str) -> bool {
        let normalized = Self::normalize_content_type(content_type);
        if self
            .config
            .blocked_content_types
            .iter()
            .any(|t| Self::normalize_content_type(t) == normalized)
        {
            return false;
        }
        if self.config.allowed_content_types.is_empty() {
            return true;
        }
        self.config
            .allowed_content_types
            .iter()
            .any(|t| Self::normalize_content_type(t) == normalized)
    }

    fn domain_matches(host: &str, entry: &str) -> bool {
        if let Some(suffix) = entry.strip_prefix("*.") {
            host == suffix || host.ends_with(&format!(".{suffix}"))
        } else {
            host.eq_ignore_ascii_case(entry)
        }
    }

    fn is_private_ipv4(addr: Ipv4Addr) -> bool {
        let octets = addr.octets();
        octets[0] == 10
            || (octets[0] == 172 && (16..=31).contains(&octets[1]))
            || (octets[0] == 192 && octets[1] == 168)
    }

    /// Policy check for one URL; `None` means it passes.
    fn check_url(&self, raw: &str) -> Option<(String, Severity)> {
        let parsed = match url::Url::parse(raw) {
            Ok(parsed) => parsed,
            Err(_) => return Some(("resource.malformed_url".into(), Severity::Low)),
        };

        if !self
            .config
            .allowed_protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(parsed.scheme()))
        {
            return Some(("resource.protocol".into(), Severity::High));
        }

        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();

        let is_localhost = LOCALHOST_NAMES.contains(&host.as_str());
        let explicitly_allowed = self
            .config
            .allowed_domains
            .iter()
            .any(|d| Self::domain_matches(&host, d));

        if is_localhost && !self.config.allow_localhost && !explicitly_allowed {
            return Some(("resource.localhost".into(), Severity::High));
        }

        if self.config.block_private_networks
            && !explicitly_allowed
            && let Ok(addr) = host.parse::<Ipv4Addr>()
            && Self::is_private_ipv4(addr)
        {
            return Some(("resource.private_network".into(), Severity::High));
        }

        if self
            .config
            .blocked_domains
            .iter()
            .any(|d| Self::domain_matches(&host, d))
        {
            return Some(("resource.blocked_domain".into(), Severity::High));
        }

        if !self.config.allowed_domains.is_empty() && !explicitly_allowed && !is_localhost {
            return Some(("resource.domain_not_allowed".into(), Severity::Medium));
        }

        None
    }
}

#[async_trait]
impl FilterPlugin for ResourceFilter {
    fn name(&self) -> &str {
        "resource"
    }

    fn priority(&self) -> i32 {
        30
    }

    async fn apply(
        &self,
        _direction: FilterDirection,
        content: &str,
    ) -> FilterResult<FilterOutcome> {
        let mut violations = Vec::new();

        if let Some(max) = self.config.max_content_size
            && content.len() > max
        {
            violations.push(Violation {
                kind: "resource.content_size".into(),
                pattern: format!("max={max}"),
                matched: format!("{} bytes", content.len()),
                position: 0,
                severity: Severity::High,
                replacement: None,
                metadata: serde_json::Map::new(),
            });
        }

        for found in URL_PATTERN.find_iter(content) {
            // Prose punctuation clings to extracted URLs.
            let trimmed = found
                .as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '}']);
            if let Some((kind, severity)) = self.check_url(trimmed) {
                violations.push(Violation {
                    kind,
                    pattern: "url".into(),
                    matched: trimmed.to_string(),
                    position: found.start(),
                    severity,
                    replacement: None,
                    metadata: serde_json::Map::new(),
                });
            }
        }

        if violations.is_empty() {
            Ok(FilterOutcome::allow())
        } else {
            Ok(FilterOutcome::block(
                "resource policy violation",
                violations,
            ))
        }
    }
}
