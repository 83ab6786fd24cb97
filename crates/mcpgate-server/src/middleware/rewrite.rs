//! Path rewriting.
//!
//! A table of regex rules evaluated in order; the first match rewrites the
//! path (with `$0`..`$9` capture substitution), injects derived headers, and
//! wins — at most one rule applies per request, and a request already marked
//! rewritten is never evaluated again.

use regex::Regex;

/// One rewrite rule.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    /// Rule name, for logs
    pub name: String,
    /// Path pattern
    pub pattern: Regex,
    /// Replacement template with `$0`..`$9` captures
    pub replacement: String,
    /// Headers to inject, values are capture templates
    pub inject_headers: Vec<(String, String)>,
}

/// Result of a successful rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// The rewritten path
    pub path: String,
    /// Headers to add to the request
    pub headers: Vec<(String, String)>,
    /// Value captured for `X-MCP-Server-ID`, if the rule injects it
    pub server_id: Option<String>,
}

/// Ordered rule table.
#[derive(Debug, Clone)]
pub struct RewriteTable {
    rules: Vec<RewriteRule>,
}

impl Default for RewriteTable {
    fn default() -> Self {
        // The servers-prefixed public contract: /servers/{id}/{transport}…
        // maps to the direct transport path with the server id implied.
        Self {
            rules: vec![RewriteRule {
                name: "servers-prefix".into(),
                pattern: Regex::new(r"^/servers/([^/]+)/(mcp|sse|ws|rpc)(.*)$")
                    .expect("servers-prefix pattern"),
                replacement: "/$2$3".into(),
                inject_headers: vec![("X-MCP-Server-ID".into(), "$1".into())],
            }],
        }
    }
}

impl RewriteTable {
    /// A table with explicit rules.
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// Apply the first matching rule. `None` when nothing matches.
    pub fn apply(&self, path: &str) -> Option<RewriteOutcome> {
        for rule in &self.rules {
            let Some(captures) = rule.pattern.captures(path) else {
                continue;
            };
            let mut new_path = String::new();
            captures.expand(&rule.replacement, &mut new_path);

            let mut headers = Vec::with_capacity(rule.inject_headers.len());
            let mut server_id = None;
            for (name, template) in &rule.inject_headers {
                let mut value = String::new();
                captures.expand(template, &mut value);
                if name.eq_ignore_ascii_case("x-mcp-server-id") {
                    server_id = Some(value.clone());
                }
                headers.push((name.clone(), value));
            }

            tracing::debug!(rule = %rule.name, from = %path, to = %new_path, "path rewritten");
            return Some(RewriteOutcome {
                path: new_path,
                headers,
                server_id,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_rule_rewrites_servers_paths() {
        let table = RewriteTable::default();
        let outcome = table.apply("/servers/42/mcp/foo").unwrap();
        assert_eq!(outcome.path, "/mcp/foo");
        assert_eq!(outcome.server_id.as_deref(), Some("42"));
        assert_eq!(
            outcome.headers,
            vec![("X-MCP-Server-ID".to_string(), "42".to_string())]
        );
    }

    #[test]
    fn all_transport_suffixes_rewrite() {
        let table = RewriteTable::default();
        for transport in ["mcp", "sse", "ws", "rpc"] {
            let outcome = table.apply(&format!("/servers/abc/{transport}")).unwrap();
            assert_eq!(outcome.path, format!("/{transport}"));
        }
    }

    #[test]
    fn unmatched_paths_pass_through() {
        let table = RewriteTable::default();
        assert!(table.apply("/mcp").is_none());
        assert!(table.apply("/tools").is_none());
        assert!(table.apply("/servers/42/other").is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let table = RewriteTable::new(vec![
            RewriteRule {
                name: "first".into(),
                pattern: Regex::new(r"^/a(.*)$").unwrap(),
                replacement: "/first$1".into(),
                inject_headers: vec![],
            },
            RewriteRule {
                name: "second".into(),
                pattern: Regex::new(r"^/a/b$").unwrap(),
                replacement: "/second".into(),
                inject_headers: vec![],
            },
        ]);
        let outcome = table.apply("/a/b").unwrap();
        assert_eq!(outcome.path, "/first/b");
    }
}
