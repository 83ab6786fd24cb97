//! Spawned-subprocess driver.
//!
//! The child is started with the configured command, arguments, environment
//! and working directory; its stdin/stdout carry newline-delimited JSON and
//! stderr is drained into the log. One request is outstanding at a time:
//! stdio upstreams cannot be assumed to multiplex.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use parking_lot::Mutex as StdMutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::{debug, trace, warn};

use crate::config::DriverOptions;
use crate::driver::{DriverState, match_reply};
use crate::error::{TransportError, TransportResult};
use mcpgate_protocol::{JsonRpcRequest, JsonRpcResponse};

type StdinWriter = FramedWrite<ChildStdin, LinesCodec>;

/// Driver for a locally spawned MCP server.
pub struct StdioDriver {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<String>,
    options: DriverOptions,

    state: Arc<StdMutex<DriverState>>,
    child: TokioMutex<Option<Child>>,
    writer: TokioMutex<Option<StdinWriter>>,
    receiver: TokioMutex<Option<mpsc::Receiver<Value>>>,
    // One outstanding request at a time.
    request_gate: TokioMutex<()>,
    reader_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
    stderr_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for StdioDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioDriver")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl StdioDriver {
    /// Build a driver; the child is not spawned until `connect`.
    pub fn new(
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<String>,
        options: DriverOptions,
    ) -> Self {
        Self {
            command,
            args,
            env,
            working_dir,
            options,
            state: Arc::new(StdMutex::new(DriverState::Disconnected)),
            child: TokioMutex::new(None),
            writer: TokioMutex::new(None),
            receiver: TokioMutex::new(None),
            request_gate: TokioMutex::new(()),
            reader_task: TokioMutex::new(None),
            stderr_task: TokioMutex::new(None),
        }
    }

    /// Current driver state.
    pub fn state(&self) -> DriverState {
        self.state.lock().clone()
    }

    /// True once `connect` succeeded and the child has not exited.
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), DriverState::Connected)
    }

    fn set_state(&self, next: DriverState) {
        let mut state = self.state.lock();
        if *state != next {
            trace!(command = %self.command, from = %*state, to = %next, "stdio driver state");
            *state = next;
        }
    }

    /// Spawn the child and wire up the framed channels. Idempotent.
    pub async fn connect(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.set_state(DriverState::Connecting);

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            self.set_state(DriverState::Failed);
            TransportError::ConnectRefused(format!("failed to spawn '{}': {e}", self.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::WireError("child stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::WireError("child stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::WireError("child stderr not piped".into()))?;

        *self.writer.lock().await = Some(FramedWrite::new(stdin, LinesCodec::new()));

        // Reader task: one JSON message per line, fed into a bounded channel.
        let (tx, rx) = mpsc::channel(self.options.receive_buffer);
        *self.receiver.lock().await = Some(rx);
        let state = Arc::clone(&self.state);
        let command_name = self.command.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(line) {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    debug!("stdio receive channel closed, stopping reader");
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(command = %command_name, error = %e, "dropping non-JSON line from child stdout");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(command = %command_name, "child stdout closed");
                        *state.lock() = DriverState::Failed;
                        break;
                    }
                    Err(e) => {
                        warn!(command = %command_name, error = %e, "error reading child stdout");
                        *state.lock() = DriverState::Failed;
                        break;
                    }
                }
            }
        });
        *self.reader_task.lock().await = Some(reader);

        // Stderr drain: upstream diagnostics go to our log, never the wire.
        let command_name = self.command.clone();
        let drain = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(command = %command_name, "upstream stderr: {line}");
            }
        });
        *self.stderr_task.lock().await = Some(drain);

        *self.child.lock().await = Some(child);
        self.set_state(DriverState::Connected);
        debug!(command = %self.command, "stdio driver connected");
        Ok(())
    }

    /// Serialise a message to a single line and write it to the child.
    pub async fn send(&self, message: &Value) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        // serde_json escapes control characters, so the line framing below
        // can never see an embedded newline.
        let line = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::NotConnected)?;
        writer.send(line).await.map_err(|e| {
            self.set_state(DriverState::Failed);
            TransportError::WireError(e.to_string())
        })?;
        Ok(())
    }

    /// Next message from the child; `UpstreamClosed` once it exits.
    pub async fn receive(&self) -> TransportResult<Value> {
        let mut receiver = self.receiver.lock().await;
        let receiver = receiver.as_mut().ok_or(TransportError::NotConnected)?;
        receiver
            .recv()
            .await
            .ok_or_else(|| TransportError::UpstreamClosed("child process exited".into()))
    }

    /// Synchronous request/reply; one in flight at a time.
    pub async fn request(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> TransportResult<JsonRpcResponse> {
        let _gate = self.request_gate.lock().await;
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
            operation: "stdio request",
            timeout,
        })?
    }

    /// Close stdin, give the child a grace period, then kill it.
    pub async fn close(&self) -> TransportResult<()> {
        if matches!(self.state(), DriverState::Closed) {
            return Ok(());
        }
        self.set_state(DriverState::Closing);

        // Dropping the writer closes stdin; well-behaved servers exit on EOF.
        *self.writer.lock().await = None;
        *self.receiver.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(self.options.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(command = %self.command, %status, "child exited within grace period");
                }
                Ok(Err(e)) => {
                    warn!(command = %self.command, error = %e, "error waiting for child");
                }
                Err(_) => {
                    warn!(command = %self.command, "child did not exit, killing");
                    if let Err(e) = child.kill().await {
                        warn!(command = %self.command, error = %e, "failed to kill child");
                    }
                }
            }
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.lock().await.take() {
            task.abort();
        }

        self.set_state(DriverState::Closed);
        Ok(())
    }
}
