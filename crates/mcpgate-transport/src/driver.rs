//! The driver sum type.
//!
//! Four transports, all known at build time; dispatch is a `match`. The one
//! capability difference is surfaced by [`Driver::supports_sync_request`]:
//! the STDIO driver serialises requests because a subprocess peer cannot be
//! assumed to multiplex.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use crate::config::{DriverOptions, TransportConfig, TransportKind};
use crate::error::{TransportError, TransportResult};
use crate::sse::SseDriver;
use crate::stdio::StdioDriver;
use crate::streamable::StreamableDriver;
use crate::websocket::WebSocketDriver;
use mcpgate_protocol::{JsonRpcRequest, JsonRpcResponse, RequestId};

/// Connection lifecycle of a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// Built but never connected
    Disconnected,
    /// `connect` in progress
    Connecting,
    /// Ready for traffic
    Connected,
    /// `close` in progress
    Closing,
    /// Closed cleanly
    Closed,
    /// The upstream went away or connect failed
    Failed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// If `message` is the reply to `id`, parse it; if it is some other frame
/// (a notification, a server-initiated request, or a stale reply), skip it.
pub(crate) fn match_reply(
    message: &Value,
    id: &RequestId,
) -> TransportResult<Option<JsonRpcResponse>> {
    let is_reply = message.get("result").is_some() || message.get("error").is_some();
    if !is_reply {
        trace!("skipping non-reply frame while awaiting response");
        return Ok(None);
    }
    let Some(frame_id) = message.get("id") else {
        return Ok(None);
    };
    let matches = match (frame_id, id) {
        (Value::String(s), RequestId::String(want)) => s == want,
        (Value::Number(n), RequestId::Number(want)) => n.as_i64() == Some(*want),
        _ => false,
    };
    if !matches {
        trace!(frame_id = %frame_id, "skipping reply for a different request");
        return Ok(None);
    }
    let reply: JsonRpcResponse = serde_json::from_value(message.clone())
        .map_err(|e| TransportError::ProtocolError(format!("malformed reply: {e}")))?;
    Ok(Some(reply))
}

/// One live upstream connection over a specific wire transport.
#[derive(Debug)]
pub enum Driver {
    /// Spawned subprocess
    Stdio(StdioDriver),
    /// Streamable HTTP
    Streamable(StreamableDriver),
    /// Server-sent events
    Sse(SseDriver),
    /// WebSocket
    WebSocket(WebSocketDriver),
}

impl Driver {
    /// Build the driver described by `config`. Validates the config but does
    /// not connect.
    pub fn from_config(config: TransportConfig, options: DriverOptions) -> TransportResult<Self> {
        config.validate()?;
        let sse_send_url = config.sse_send_url();
        Ok(match config {
            TransportConfig::Stdio {
                command,
                args,
                env,
                working_dir,
            } => Self::Stdio(StdioDriver::new(command, args, env, working_dir, options)),
            TransportConfig::Streamable {
                url,
                headers,
                auth_token,
            } => Self::Streamable(StreamableDriver::new(url, headers, auth_token, options)),
            TransportConfig::Sse {
                url,
                headers,
                auth_token,
                ..
            } => {
                let send_url = sse_send_url.expect("sse config derives a send url");
                Self::Sse(SseDriver::new(url, send_url, headers, auth_token, options))
            }
            TransportConfig::WebSocket { url, headers } => {
                Self::WebSocket(WebSocketDriver::new(url, headers, options))
            }
        })
    }

    /// The transport this driver speaks.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio(_) => TransportKind::Stdio,
            Self::Streamable(_) => TransportKind::Streamable,
            Self::Sse(_) => TransportKind::Sse,
            Self::WebSocket(_) => TransportKind::WebSocket,
        }
    }

    /// True for drivers that serialise request/reply internally.
    pub fn supports_sync_request(&self) -> bool {
        matches!(self, Self::Stdio(_))
    }

    /// Establish the connection. Idempotent.
    pub async fn connect(&self) -> TransportResult<()> {
        match self {
            Self::Stdio(d) => d.connect().await,
            Self::Streamable(d) => d.connect().await,
            Self::Sse(d) => d.connect().await,
            Self::WebSocket(d) => d.connect().await,
        }
    }

    /// Serialise one MCP message to the wire.
    pub async fn send(&self, message: &Value) -> TransportResult<()> {
        match self {
            Self::Stdio(d) => d.send(message).await,
            Self::Streamable(d) => d.send(message).await,
            Self::Sse(d) => d.send(message).await,
            Self::WebSocket(d) => d.send(message).await,
        }
    }

    /// Next inbound message; blocks until one arrives or the upstream closes.
    pub async fn receive(&self) -> TransportResult<Value> {
        match self {
            Self::Stdio(d) => d.receive().await,
            Self::Streamable(d) => d.receive().await,
            Self::Sse(d) => d.receive().await,
            Self::WebSocket(d) => d.receive().await,
        }
    }

    /// Request/reply with id correlation and a deadline.
    pub async fn request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> TransportResult<JsonRpcResponse> {
        match self {
            // The stdio driver holds its own gate so only one request is in
            // flight against the child at a time.
            Self::Stdio(d) => d.request(request, timeout).await,
            _ => {
                let id = request.id.clone();
                self.send(&serde_json::to_value(&request)?).await?;
                tokio::time::timeout(timeout, async {
                    loop {
                        let message = self.receive().await?;
                        if let Some(reply) = match_reply(&message, &id)? {
                            return Ok(reply);
                        }
                    }
                })
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: "request",
                    timeout,
                })?
            }
        }
    }

    /// Release sockets, subprocesses and tasks. Idempotent.
    pub async fn close(&self) -> TransportResult<()> {
        match self {
            Self::Stdio(d) => d.close().await,
            Self::Streamable(d) => d.close().await,
            Self::Sse(d) => d.close().await,
            Self::WebSocket(d) => d.close().await,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        match self {
            Self::Stdio(d) => d.state(),
            Self::Streamable(d) => d.state(),
            Self::Sse(d) => d.state(),
            Self::WebSocket(d) => d.state(),
        }
    }

    /// True when in the connected state.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), DriverState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn from_config_validates() {
        let bad = TransportConfig::Stdio {
            command: String::new(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
        };
        assert!(Driver::from_config(bad, DriverOptions::default()).is_err());

        let good = TransportConfig::WebSocket {
            url: "wss://example.com/mcp".into(),
            headers: HashMap::new(),
        };
        let driver = Driver::from_config(good, DriverOptions::default()).unwrap();
        assert_eq!(driver.kind(), TransportKind::WebSocket);
        assert!(!driver.supports_sync_request());
    }

    #[test]
    fn only_stdio_is_sync_request() {
        let stdio = Driver::from_config(
            TransportConfig::Stdio {
                command: "cat".into(),
                args: vec![],
                env: HashMap::new(),
                working_dir: None,
            },
            DriverOptions::default(),
        )
        .unwrap();
        assert!(stdio.supports_sync_request());
    }

    #[test]
    fn match_reply_skips_notifications_and_foreign_ids() {
        let id = RequestId::from(5);
        let notification = json!({"jsonrpc": "2.0", "method": "notifications/progress"});
        assert!(match_reply(&notification, &id).unwrap().is_none());

        let foreign = json!({"jsonrpc": "2.0", "id": 6, "result": {}});
        assert!(match_reply(&foreign, &id).unwrap().is_none());

        let matching = json!({"jsonrpc": "2.0", "id": 5, "result": {"ok": true}});
        let reply = match_reply(&matching, &id).unwrap().unwrap();
        assert_eq!(reply.result().unwrap()["ok"], json!(true));
    }

    #[test]
    fn match_reply_rejects_malformed_reply() {
        let id = RequestId::from("abc");
        // Right id, has a `result`, but the error object is not well-formed.
        let malformed = json!({"jsonrpc": "2.0", "id": "abc", "error": {"message": 5}});
        assert!(match_reply(&malformed, &id).is_err());
    }
}
