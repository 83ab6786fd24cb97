//! Streamable-HTTP driver.
//!
//! Every outbound message is a POST of the JSON frame; the reply may come
//! back immediately as `application/json` or as a short `text/event-stream`
//! body, both of which are queued for `receive`. A long-poll GET task picks
//! up server-initiated messages. Session continuity is carried by the
//! `X-Session-ID` header: the first value the upstream returns is echoed on
//! every subsequent call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex as StdMutex;
use reqwest::header;
use serde_json::Value;
use tokio::sync::{Mutex as TokioMutex, mpsc, watch};
use tracing::{debug, trace, warn};

use crate::config::DriverOptions;
use crate::driver::DriverState;
use crate::error::{TransportError, TransportResult};
use crate::sse::SseParser;

/// Header carrying upstream session identity (`X-Session-ID` on the wire;
/// header names are case-insensitive and `http` stores them lower-cased).
pub const SESSION_HEADER: &str = "x-session-id";

/// Driver for a streamable-HTTP upstream.
pub struct StreamableDriver {
    url: String,
    headers: HashMap<String, String>,
    auth_token: Option<String>,
    options: DriverOptions,

    http: reqwest::Client,
    state: Arc<StdMutex<DriverState>>,
    session_id: Arc<StdMutex<Option<String>>>,
    inbound_tx: mpsc::Sender<Value>,
    inbound_rx: TokioMutex<mpsc::Receiver<Value>>,
    shutdown: StdMutex<Option<watch::Sender<bool>>>,
    poll_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for StreamableDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableDriver")
            .field("url", &self.url)
            .field("state", &*self.state.lock())
            .field("session_id", &*self.session_id.lock())
            .finish_non_exhaustive()
    }
}

impl StreamableDriver {
    /// Build a driver with a pooled HTTP client.
    pub fn new(
        url: String,
        headers: HashMap<String, String>,
        auth_token: Option<String>,
        options: DriverOptions,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .unwrap_or_default();
        let (inbound_tx, inbound_rx) = mpsc::channel(options.receive_buffer);
        Self {
            url,
            headers,
            auth_token,
            options,
            http,
            state: Arc::new(StdMutex::new(DriverState::Disconnected)),
            session_id: Arc::new(StdMutex::new(None)),
            inbound_tx,
            inbound_rx: TokioMutex::new(inbound_rx),
            shutdown: StdMutex::new(None),
            poll_task: TokioMutex::new(None),
        }
    }

    /// Current driver state.
    pub fn state(&self) -> DriverState {
        self.state.lock().clone()
    }

    /// True once `connect` has run.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), DriverState::Connected)
    }

    /// Upstream session id, once the upstream has assigned one.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn request_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (key, value) in &self.headers {
            if let (Ok(k), Ok(v)) = (
                header::HeaderName::from_bytes(key.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                headers.insert(k, v);
            }
        }
        if let Some(token) = &self.auth_token
            && let Ok(v) = header::HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(header::AUTHORIZATION, v);
        }
        if let Some(session) = self.session_id.lock().clone()
            && let Ok(v) = header::HeaderValue::from_str(&session)
        {
            headers.insert(SESSION_HEADER, v);
        }
        headers
    }

    fn capture_session(&self, response: &reqwest::Response) {
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut slot = self.session_id.lock();
            if slot.as_deref() != Some(session) {
                debug!(session, url = %self.url, "upstream assigned session id");
                *slot = Some(session.to_string());
            }
        }
    }

    /// Start the long-poll task. The first POST performs the real handshake,
    /// so `connect` succeeds without touching the network.
    pub async fn connect(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        *self.state.lock() = DriverState::Connecting;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        let task = tokio::spawn(Self::poll_task(
            self.url.clone(),
            self.http.clone(),
            self.request_headers(),
            Arc::clone(&self.session_id),
            self.inbound_tx.clone(),
            shutdown_rx,
        ));
        *self.poll_task.lock().await = Some(task);

        *self.state.lock() = DriverState::Connected;
        Ok(())
    }

    /// Long-poll GET loop for server-initiated messages. Upstreams that do
    /// not support GET (405/404) disable polling for the driver's lifetime.
    async fn poll_task(
        url: String,
        http: reqwest::Client,
        base_headers: header::HeaderMap,
        session_id: Arc<StdMutex<Option<String>>>,
        tx: mpsc::Sender<Value>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let mut headers = base_headers.clone();
            if let Some(session) = session_id.lock().clone()
                && let Ok(v) = header::HeaderValue::from_str(&session)
            {
                headers.insert(SESSION_HEADER, v);
            }

            let response = tokio::select! {
                r = http.get(&url).headers(headers).send() => r,
                _ = shutdown.changed() => return,
            };
            match response {
                Ok(r) if r.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED
                    || r.status() == reqwest::StatusCode::NOT_FOUND =>
                {
                    debug!(%url, status = %r.status(), "upstream does not serve GET, polling disabled");
                    return;
                }
                Ok(r) if r.status().is_success() => {
                    let content_type = r
                        .headers()
                        .get(header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    if content_type.contains("text/event-stream") {
                        let mut parser = SseParser::default();
                        let mut stream = r.bytes_stream();
                        loop {
                            tokio::select! {
                                chunk = stream.next() => match chunk {
                                    Some(Ok(bytes)) => {
                                        for event in parser.push(&String::from_utf8_lossy(&bytes)) {
                                            let data = event.data_str();
                                            if data.trim().is_empty() {
                                                continue;
                                            }
                                            if let Ok(message) = serde_json::from_str::<Value>(&data)
                                                && tx.send(message).await.is_err()
                                            {
                                                return;
                                            }
                                        }
                                    }
                                    Some(Err(e)) => {
                                        trace!(error = %e, "long-poll stream error");
                                        break;
                                    }
                                    None => break,
                                },
                                _ = shutdown.changed() => return,
                            }
                        }
                    } else if let Ok(message) = r.json::<Value>().await
                        && tx.send(message).await.is_err()
                    {
                        return;
                    }
                }
                Ok(r) => {
                    trace!(status = %r.status(), "long-poll rejected, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    trace!(error = %e, "long-poll failed, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// POST one message; queue whatever the upstream answers with.
    pub async fn send(&self, message: &Value) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let response = self
            .http
            .post(&self.url)
            .headers(self.request_headers())
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::ConnectRefused(e.to_string())
                } else if e.is_timeout() {
                    TransportError::Timeout {
                        operation: "streamable post",
                        timeout: self.options.request_timeout,
                    }
                } else {
                    TransportError::WireError(e.to_string())
                }
            })?;

        self.capture_session(&response);

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::WireError(format!("POST returned {status}")));
        }
        // 202 acknowledges a notification; nothing to queue.
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("application/json") {
            let reply: Value = response
                .json()
                .await
                .map_err(|e| TransportError::Serialization(e.to_string()))?;
            self.inbound_tx
                .send(reply)
                .await
                .map_err(|_| TransportError::UpstreamClosed("receive queue closed".into()))?;
        } else if content_type.contains("text/event-stream") {
            // Replies may arrive as a short SSE body; drain it inline so the
            // caller's next receive() observes them in order.
            let mut parser = SseParser::default();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let bytes = chunk.map_err(|e| TransportError::WireError(e.to_string()))?;
                for event in parser.push(&String::from_utf8_lossy(&bytes)) {
                    let data = event.data_str();
                    if data.trim().is_empty() {
                        continue;
                    }
                    let message: Value = serde_json::from_str(&data)
                        .map_err(|e| TransportError::Serialization(e.to_string()))?;
                    self.inbound_tx
                        .send(message)
                        .await
                        .map_err(|_| TransportError::UpstreamClosed("receive queue closed".into()))?;
                }
            }
        }
        Ok(())
    }

    /// Next queued inbound message.
    pub async fn receive(&self) -> TransportResult<Value> {
        let mut receiver = self.inbound_rx.lock().await;
        receiver
            .recv()
            .await
            .ok_or_else(|| TransportError::UpstreamClosed("receive queue closed".into()))
    }

    /// Stop polling and forget the session. Idempotent.
    pub async fn close(&self) -> TransportResult<()> {
        if matches!(self.state(), DriverState::Closed) {
            return Ok(());
        }
        *self.state.lock() = DriverState::Closing;
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
        }
        *self.session_id.lock() = None;
        *self.state.lock() = DriverState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header as header_match, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver_for(server: &MockServer) -> StreamableDriver {
        StreamableDriver::new(
            format!("{}/mcp", server.uri()),
            HashMap::new(),
            None,
            DriverOptions::default(),
        )
    }

    #[tokio::test]
    async fn json_reply_is_queued_for_receive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}})),
            )
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        driver.connect().await.unwrap();
        driver
            .send(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await
            .unwrap();
        let reply = driver.receive().await.unwrap();
        assert_eq!(reply["result"]["tools"], json!([]));
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn sse_framed_reply_is_queued() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(
                        "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n\n",
                    ),
            )
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        driver.connect().await.unwrap();
        driver
            .send(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        let reply = driver.receive().await.unwrap();
        assert_eq!(reply["id"], json!(2));
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn session_header_is_captured_and_echoed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(header_match(SESSION_HEADER, "sess-1"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(202).insert_header(SESSION_HEADER, "sess-1"))
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        driver.connect().await.unwrap();

        driver
            .send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .unwrap();
        assert_eq!(driver.session_id().as_deref(), Some("sess-1"));

        // Second send must carry the header; the first mock (more specific)
        // only matches when it does.
        driver
            .send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .unwrap();
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_wire_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let driver = driver_for(&server);
        driver.connect().await.unwrap();
        let err = driver
            .send(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::WireError(_)));
        driver.close().await.unwrap();
    }
}
