//! WebSocket driver.
//!
//! Messages are text frames containing JSON. A single reader task owns the
//! stream half, answers pings, and feeds a bounded channel; the sink half is
//! shared behind an async mutex for sends.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as StdMutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use crate::config::DriverOptions;
use crate::driver::DriverState;
use crate::error::{TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Driver for a WebSocket upstream.
pub struct WebSocketDriver {
    url: String,
    headers: HashMap<String, String>,
    options: DriverOptions,

    state: Arc<StdMutex<DriverState>>,
    sink: TokioMutex<Option<WsSink>>,
    receiver: TokioMutex<Option<mpsc::Receiver<Value>>>,
    reader_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for WebSocketDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketDriver")
            .field("url", &self.url)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl WebSocketDriver {
    /// Build a driver; the handshake happens on `connect`.
    pub fn new(url: String, headers: HashMap<String, String>, options: DriverOptions) -> Self {
        Self {
            url,
            headers,
            options,
            state: Arc::new(StdMutex::new(DriverState::Disconnected)),
            sink: TokioMutex::new(None),
            receiver: TokioMutex::new(None),
            reader_task: TokioMutex::new(None),
        }
    }

    /// Current driver state.
    pub fn state(&self) -> DriverState {
        self.state.lock().clone()
    }

    /// True once the handshake completed.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), DriverState::Connected)
    }

    /// Perform the handshake and start the reader task. Idempotent.
    pub async fn connect(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        *self.state.lock() = DriverState::Connecting;

        let mut request = self
            .url
            .clone()
            .into_client_request()
            .map_err(|e| TransportError::ConnectRefused(format!("bad websocket url: {e}")))?;
        for (key, value) in &self.headers {
            if let (Ok(k), Ok(v)) = (
                key.parse::<tokio_tungstenite::tungstenite::http::HeaderName>(),
                value.parse::<tokio_tungstenite::tungstenite::http::HeaderValue>(),
            ) {
                request.headers_mut().insert(k, v);
            }
        }

        let (stream, _response) =
            tokio::time::timeout(self.options.connect_timeout, connect_async(request))
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: "websocket handshake",
                    timeout: self.options.connect_timeout,
                })?
                .map_err(|e| {
                    *self.state.lock() = DriverState::Failed;
                    TransportError::ConnectRefused(e.to_string())
                })?;

        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);

        let (tx, rx) = mpsc::channel(self.options.receive_buffer);
        *self.receiver.lock().await = Some(rx);
        let state = Arc::clone(&self.state);
        let url = self.url.clone();
        let task = tokio::spawn(Self::reader_task(source, tx, state, url));
        *self.reader_task.lock().await = Some(task);

        *self.state.lock() = DriverState::Connected;
        debug!(url = %self.url, "websocket driver connected");
        Ok(())
    }

    /// Single consumer of the stream half; routes text frames to the channel.
    async fn reader_task(
        mut source: WsSource,
        tx: mpsc::Sender<Value>,
        state: Arc<StdMutex<DriverState>>,
        url: String,
    ) {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            debug!(%url, "websocket receive channel closed");
                            return;
                        }
                    }
                    Err(e) => warn!(%url, error = %e, "dropping non-JSON websocket frame"),
                },
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Ping replies are handled by tungstenite's write path.
                    trace!(%url, "websocket control frame");
                }
                Ok(Message::Close(frame)) => {
                    debug!(%url, ?frame, "websocket closed by upstream");
                    break;
                }
                Ok(Message::Binary(_)) => {
                    warn!(%url, "dropping unexpected binary websocket frame");
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    warn!(%url, error = %e, "websocket stream error");
                    break;
                }
            }
        }
        *state.lock() = DriverState::Failed;
    }

    /// Send one message as a text frame.
    pub async fn send(&self, message: &Value) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let text = serde_json::to_string(message)?;
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(text.into())).await.map_err(|e| {
            *self.state.lock() = DriverState::Failed;
            TransportError::WireError(e.to_string())
        })
    }

    /// Next inbound message.
    pub async fn receive(&self) -> TransportResult<Value> {
        let mut receiver = self.receiver.lock().await;
        let receiver = receiver.as_mut().ok_or(TransportError::NotConnected)?;
        receiver
            .recv()
            .await
            .ok_or_else(|| TransportError::UpstreamClosed("websocket closed".into()))
    }

    /// Send a close frame and stop the reader. Idempotent.
    pub async fn close(&self) -> TransportResult<()> {
        if matches!(self.state(), DriverState::Closed) {
            return Ok(());
        }
        *self.state.lock() = DriverState::Closing;
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        *self.receiver.lock().await = None;
        *self.state.lock() = DriverState::Closed;
        Ok(())
    }
}
