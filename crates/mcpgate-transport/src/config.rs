//! Per-transport driver configuration.

use crate::error::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The wire transport a driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned subprocess, newline-delimited JSON over stdin/stdout
    Stdio,
    /// Streamable HTTP: POST per message, long-poll GET for pushes
    Streamable,
    /// Server-sent events with a companion POST send endpoint
    Sse,
    /// WebSocket text frames
    WebSocket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stdio => "stdio",
            Self::Streamable => "streamable",
            Self::Sse => "sse",
            Self::WebSocket => "websocket",
        };
        f.write_str(s)
    }
}

/// Driver configuration, one variant per transport.
///
/// Built from an upstream server record; the record-level invariants (url
/// present for network transports, command present for stdio) are enforced
/// by [`TransportConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawned subprocess
    Stdio {
        /// Executable to spawn
        command: String,
        /// Arguments
        #[serde(default)]
        args: Vec<String>,
        /// Extra environment injected into the child
        #[serde(default)]
        env: HashMap<String, String>,
        /// Working directory, inherited when unset
        #[serde(default)]
        working_dir: Option<String>,
    },
    /// Streamable HTTP
    Streamable {
        /// MCP endpoint URL
        url: String,
        /// Extra request headers
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Bearer token
        #[serde(default)]
        auth_token: Option<String>,
    },
    /// Server-sent events
    Sse {
        /// Event-stream URL
        url: String,
        /// Companion POST endpoint; `{url}/send` when unset
        #[serde(default)]
        send_url: Option<String>,
        /// Extra request headers
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Bearer token
        #[serde(default)]
        auth_token: Option<String>,
    },
    /// WebSocket
    WebSocket {
        /// ws:// or wss:// URL
        url: String,
        /// Extra handshake headers
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// The transport this configuration describes.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Streamable { .. } => TransportKind::Streamable,
            Self::Sse { .. } => TransportKind::Sse,
            Self::WebSocket { .. } => TransportKind::WebSocket,
        }
    }

    /// Check structural invariants before a driver is built.
    pub fn validate(&self) -> TransportResult<()> {
        match self {
            Self::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(TransportError::Config(
                        "stdio transport requires a command".into(),
                    ));
                }
            }
            Self::Streamable { url, .. } | Self::Sse { url, .. } => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| TransportError::Config(format!("invalid url '{url}': {e}")))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(TransportError::Config(format!(
                        "unsupported scheme '{}' for {} transport",
                        parsed.scheme(),
                        self.kind()
                    )));
                }
            }
            Self::WebSocket { url, .. } => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| TransportError::Config(format!("invalid url '{url}': {e}")))?;
                if !matches!(parsed.scheme(), "ws" | "wss") {
                    return Err(TransportError::Config(format!(
                        "unsupported scheme '{}' for websocket transport",
                        parsed.scheme()
                    )));
                }
            }
        }
        Ok(())
    }

    /// The SSE send endpoint, derived when not configured.
    pub fn sse_send_url(&self) -> Option<String> {
        match self {
            Self::Sse { url, send_url, .. } => Some(
                send_url
                    .clone()
                    .unwrap_or_else(|| format!("{}/send", url.trim_end_matches('/'))),
            ),
            _ => None,
        }
    }
}

/// Timeouts and limits applied uniformly across drivers.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Deadline for `connect`
    pub connect_timeout: Duration,
    /// Default deadline for `request`
    pub request_timeout: Duration,
    /// Grace period before a stdio child is killed on close
    pub shutdown_grace: Duration,
    /// Bound of the per-driver receive channel
    pub receive_buffer: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            receive_buffer: 256,
        }
    }
}

impl DriverOptions {
    /// Override the request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
