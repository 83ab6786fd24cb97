//! Server-sent-events driver.
//!
//! A single long-lived GET carries upstream-to-gateway messages as
//! `text/event-stream` data lines; gateway-to-upstream messages go over a
//! companion POST endpoint. A broken stream reconnects with exponential
//! backoff capped at 30 s, resetting on success.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex as StdMutex;
use reqwest::header;
use serde_json::Value;
use tokio::sync::{Mutex as TokioMutex, mpsc, watch};
use tracing::{debug, trace, warn};

use crate::backoff::BackoffPolicy;
use crate::config::DriverOptions;
use crate::driver::DriverState;
use crate::error::{TransportError, TransportResult};

/// One parsed SSE event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: Vec<String>,
    pub id: Option<String>,
}

impl SseEvent {
    pub(crate) fn data_str(&self) -> String {
        self.data.join("\n")
    }
}

/// Incremental `text/event-stream` parser. Feed chunks, drain events.
///
/// Events are delimited by a blank line; fields are `name: value` lines.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: String,
}

impl SseParser {
    pub(crate) fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let raw = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + 2);
            if let Some(event) = Self::parse_event(&raw) {
                events.push(event);
            }
        }
        events
    }

    fn parse_event(raw: &str) -> Option<SseEvent> {
        let mut event = SseEvent::default();
        for line in raw.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.find(':') {
                Some(pos) => (&line[..pos], line[pos + 1..].trim_start()),
                None => (line, ""),
            };
            match field {
                "event" => event.event = Some(value.to_string()),
                "data" => event.data.push(value.to_string()),
                "id" => event.id = Some(value.to_string()),
                _ => {}
            }
        }
        if event.data.is_empty() && event.event.is_none() && event.id.is_none() {
            None
        } else {
            Some(event)
        }
    }
}

/// Driver for an SSE upstream.
pub struct SseDriver {
    url: String,
    send_url: String,
    headers: HashMap<String, String>,
    auth_token: Option<String>,
    options: DriverOptions,

    http: reqwest::Client,
    state: Arc<StdMutex<DriverState>>,
    last_event_id: Arc<StdMutex<Option<String>>>,
    receiver: TokioMutex<Option<mpsc::Receiver<Value>>>,
    shutdown: StdMutex<Option<watch::Sender<bool>>>,
    stream_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for SseDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseDriver")
            .field("url", &self.url)
            .field("send_url", &self.send_url)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl SseDriver {
    /// Build a driver; the stream opens on `connect`.
    pub fn new(
        url: String,
        send_url: String,
        headers: HashMap<String, String>,
        auth_token: Option<String>,
        options: DriverOptions,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .unwrap_or_default();
        Self {
            url,
            send_url,
            headers,
            auth_token,
            options,
            http,
            state: Arc::new(StdMutex::new(DriverState::Disconnected)),
            last_event_id: Arc::new(StdMutex::new(None)),
            receiver: TokioMutex::new(None),
            shutdown: StdMutex::new(None),
            stream_task: TokioMutex::new(None),
        }
    }

    /// Current driver state.
    pub fn state(&self) -> DriverState {
        self.state.lock().clone()
    }

    /// True while the event stream is up.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), DriverState::Connected)
    }

    fn request_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
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
        headers
    }

    /// Open the event stream and start the reconnect loop. Idempotent.
    pub async fn connect(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        *self.state.lock() = DriverState::Connecting;

        let (tx, rx) = mpsc::channel(self.options.receive_buffer);
        *self.receiver.lock().await = Some(rx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        let task = tokio::spawn(Self::stream_task(
            self.url.clone(),
            self.request_headers(),
            self.http.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.last_event_id),
            tx,
            shutdown_rx,
        ));
        *self.stream_task.lock().await = Some(task);
        Ok(())
    }

    /// The reconnecting stream reader.
    async fn stream_task(
        url: String,
        base_headers: header::HeaderMap,
        http: reqwest::Client,
        state: Arc<StdMutex<DriverState>>,
        last_event_id: Arc<StdMutex<Option<String>>>,
        tx: mpsc::Sender<Value>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let policy = BackoffPolicy::default();
        let mut attempt = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }
            if attempt > 0 {
                // delay() is None only for bounded policies; the stream
                // policy retries until shutdown.
                let delay = policy.delay(attempt - 1).unwrap_or(policy.max_delay);
                debug!(?delay, attempt, %url, "sse reconnect backoff");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }

            let mut headers = base_headers.clone();
            headers.insert(
                header::ACCEPT,
                header::HeaderValue::from_static("text/event-stream"),
            );
            if let Some(id) = last_event_id.lock().clone()
                && let Ok(v) = header::HeaderValue::from_str(&id)
            {
                headers.insert("last-event-id", v);
            }

            let response = match http.get(&url).headers(headers).send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    warn!(status = %r.status(), %url, "sse stream rejected");
                    attempt += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, %url, "sse connect failed");
                    attempt += 1;
                    continue;
                }
            };

            debug!(%url, "sse stream established");
            *state.lock() = DriverState::Connected;
            attempt = 0;

            let mut parser = SseParser::default();
            let mut stream = response.bytes_stream();
            loop {
                tokio::select! {
                    chunk = stream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            for event in parser.push(&String::from_utf8_lossy(&bytes)) {
                                if let Some(id) = &event.id {
                                    *last_event_id.lock() = Some(id.clone());
                                }
                                let data = event.data_str();
                                if data.trim().is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<Value>(&data) {
                                    Ok(message) => {
                                        if tx.send(message).await.is_err() {
                                            debug!("sse receive channel closed");
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "dropping non-JSON sse event");
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, %url, "sse stream error");
                            break;
                        }
                        None => {
                            debug!(%url, "sse stream ended");
                            break;
                        }
                    },
                    _ = shutdown.changed() => return,
                }
            }

            *state.lock() = DriverState::Connecting;
            attempt += 1;
        }
    }

    /// POST one message to the companion send endpoint.
    pub async fn send(&self, message: &Value) -> TransportResult<()> {
        let response = self
            .http
            .post(&self.send_url)
            .headers(self.request_headers())
            .json(message)
            .send()
            .await
            .map_err(|e| TransportError::WireError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::WireError(format!(
                "send endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Next message from the event stream.
    pub async fn receive(&self) -> TransportResult<Value> {
        let mut receiver = self.receiver.lock().await;
        let receiver = receiver.as_mut().ok_or(TransportError::NotConnected)?;
        receiver
            .recv()
            .await
            .ok_or_else(|| TransportError::UpstreamClosed("event stream closed".into()))
    }

    /// Stop the stream task and drop the channel. Idempotent.
    pub async fn close(&self) -> TransportResult<()> {
        if matches!(self.state(), DriverState::Closed) {
            return Ok(());
        }
        *self.state.lock() = DriverState::Closing;
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.stream_task.lock().await.take() {
            task.abort();
        }
        *self.receiver.lock().await = None;
        *self.state.lock() = DriverState::Closed;
        trace!(url = %self.url, "sse driver closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parser_splits_on_blank_lines() {
        let mut parser = SseParser::default();
        let events = parser.push("data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data_str(), "{\"a\":1}");
        assert_eq!(events[1].data_str(), "{\"b\":2}");
    }

    #[test]
    fn parser_handles_partial_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push("data: {\"a\"").is_empty());
        assert!(parser.push(":1}\n").is_empty());
        let events = parser.push("\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data_str(), "{\"a\":1}");
    }

    #[test]
    fn parser_collects_fields() {
        let mut parser = SseParser::default();
        let events = parser.push("event: message\nid: 42\ndata: first\ndata: second\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert_eq!(events[0].data_str(), "first\nsecond");
    }

    #[test]
    fn parser_ignores_comment_lines() {
        let mut parser = SseParser::default();
        let events = parser.push(": keep-alive\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data_str(), "x");
    }

    #[tokio::test]
    async fn stream_and_send_against_mock_upstream() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/events/send"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let driver = SseDriver::new(
            format!("{}/events", server.uri()),
            format!("{}/events/send", server.uri()),
            HashMap::new(),
            None,
            DriverOptions::default(),
        );
        driver.connect().await.unwrap();

        let message = driver.receive().await.unwrap();
        assert_eq!(message["id"], serde_json::json!(1));

        driver
            .send(&serde_json::json!({"jsonrpc": "2.0", "method": "x"}))
            .await
            .unwrap();

        driver.close().await.unwrap();
        assert_eq!(driver.state(), DriverState::Closed);
    }
}
