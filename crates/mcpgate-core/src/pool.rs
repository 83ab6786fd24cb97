//! The transport-agnostic session pool.
//!
//! One long-lived session per (namespace, upstream) pair. The outer map is a
//! concurrent map; session creation is guarded by a per-key mutex so two
//! concurrent `get` calls for the same key instantiate exactly one driver,
//! while creation for different keys never serialises. `connect` runs outside
//! any map lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex as StdMutex;
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::McpServer;
use mcpgate_protocol::jsonrpc::JsonRpcNotification;
use mcpgate_protocol::types::PROTOCOL_VERSION;
use mcpgate_protocol::{
    GatewayError, GatewayResult, JsonRpcRequest, JsonRpcResponse, METHOD_INITIALIZE,
    METHOD_INITIALIZED, RequestId,
};
use mcpgate_transport::{Driver, DriverOptions};

/// Lifecycle of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Inserted, driver not yet connected
    Created,
    /// Driver connect in progress
    Connecting,
    /// Serving traffic
    Ready,
    /// Being closed
    Closing,
    /// Closed; about to be removed from the map
    Closed,
    /// Driver failed; next `get` replaces it
    Error,
}

/// A long-lived logical connection to one upstream.
pub struct Session {
    /// Session identity, for logs
    pub id: Uuid,
    /// Namespace half of the pool key
    pub namespace_id: String,
    /// Upstream half of the pool key
    pub server_id: String,
    driver: Driver,
    state: StdMutex<SessionState>,
    last_used: AtomicI64,
    // FIFO request ordering within the session.
    serial: TokioMutex<()>,
    next_request_id: AtomicI64,
}

impl Session {
    fn new(namespace_id: String, server_id: String, driver: Driver) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace_id,
            server_id,
            driver,
            state: StdMutex::new(SessionState::Created),
            last_used: AtomicI64::new(now_epoch()),
            serial: TokioMutex::new(()),
            next_request_id: AtomicI64::new(1),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Seconds since the epoch of the last request through this session.
    pub fn last_used(&self) -> i64 {
        self.last_used.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_used.store(now_epoch(), Ordering::Relaxed);
    }

    /// The driver, for callers that need transport metadata.
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Allocate the next request id for this session.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Perform one MCP request over this session. Requests are strictly
    /// serialised: the second caller waits for the first reply.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> GatewayResult<JsonRpcResponse> {
        let _serial = self.serial.lock().await;
        self.touch();
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        let reply = self.driver.request(request, timeout).await.map_err(|e| {
            self.set_state(SessionState::Error);
            GatewayError::from(e).with_component("session")
        })?;
        Ok(reply)
    }

    /// Send a raw frame without awaiting a reply.
    pub async fn send(&self, message: &Value) -> GatewayResult<()> {
        let _serial = self.serial.lock().await;
        self.touch();
        self.driver
            .send(message)
            .await
            .map_err(|e| GatewayError::from(e).with_component("session"))
    }

    async fn close(&self) {
        self.set_state(SessionState::Closing);
        if let Err(e) = self.driver.close().await {
            warn!(session = %self.id, error = %e, "error closing driver");
        }
        self.set_state(SessionState::Closed);
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Driver timeouts and buffers
    pub driver: DriverOptions,
    /// Perform the MCP `initialize` handshake on session creation
    pub handshake: bool,
    /// Deadline for the handshake request
    pub handshake_timeout: Duration,
    /// Close sessions idle longer than this; `None` disables the reaper
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            driver: DriverOptions::default(),
            handshake: true,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    namespace_id: String,
    server_id: String,
}

/// Pool of live sessions keyed by (namespace, upstream).
pub struct SessionPool {
    sessions: DashMap<SessionKey, Arc<Session>>,
    // Per-key creation locks; entries are created on demand and cheap to keep.
    creating: DashMap<SessionKey, Arc<TokioMutex<()>>>,
    options: PoolOptions,
}

impl SessionPool {
    /// Empty pool.
    pub fn new(options: PoolOptions) -> Self {
        Self {
            sessions: DashMap::new(),
            creating: DashMap::new(),
            options,
        }
    }

    /// Live session for the pair, creating and connecting one when absent.
    ///
    /// Double-checked: a fast read first, then the per-key creation mutex,
    /// then a re-check under the mutex. Exactly one driver is instantiated
    /// for concurrent callers; all observe the same session.
    pub async fn get(
        &self,
        namespace_id: &str,
        server: &McpServer,
    ) -> GatewayResult<Arc<Session>> {
        let key = SessionKey {
            namespace_id: namespace_id.to_string(),
            server_id: server.id.clone(),
        };

        if let Some(session) = self.live_session(&key) {
            session.touch();
            return Ok(session);
        }

        let gate = self
            .creating
            .entry(key.clone())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // Re-check: another caller may have finished while we waited.
        if let Some(session) = self.live_session(&key) {
            session.touch();
            return Ok(session);
        }

        // A failed session may still occupy the slot; release its driver
        // before replacing it.
        if let Some((_, stale)) = self.sessions.remove(&key) {
            stale.close().await;
        }

        let mut driver_options = self.options.driver.clone();
        driver_options.request_timeout = Duration::from_secs(server.timeout_secs);
        let driver = Driver::from_config(server.transport_config()?, driver_options)
            .map_err(|e| GatewayError::from(e).with_component("pool"))?;

        let session = Arc::new(Session::new(
            key.namespace_id.clone(),
            key.server_id.clone(),
            driver,
        ));
        session.set_state(SessionState::Connecting);
        self.sessions.insert(key.clone(), Arc::clone(&session));

        // Connect (and handshake) outside the map; only this key's creation
        // mutex is held.
        match self.establish(&session).await {
            Ok(()) => {
                session.set_state(SessionState::Ready);
                debug!(
                    session = %session.id,
                    namespace = %key.namespace_id,
                    server = %key.server_id,
                    transport = %session.driver.kind(),
                    "session established"
                );
                Ok(session)
            }
            Err(e) => {
                // Failed creation must not leak a map entry.
                self.sessions.remove(&key);
                session.close().await;
                Err(e)
            }
        }
    }

    async fn establish(&self, session: &Session) -> GatewayResult<()> {
        session
            .driver
            .connect()
            .await
            .map_err(|e| GatewayError::from(e).with_component("pool"))?;

        if self.options.handshake {
            let params = serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "mcpgate",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            });
            let request = JsonRpcRequest::new(session.next_id(), METHOD_INITIALIZE, Some(params));
            session
                .driver
                .request(request, self.options.handshake_timeout)
                .await
                .map_err(|e| GatewayError::from(e).with_component("pool"))?;
            let initialized = JsonRpcNotification::new(METHOD_INITIALIZED, None);
            session
                .driver
                .send(&serde_json::to_value(&initialized)?)
                .await
                .map_err(|e| GatewayError::from(e).with_component("pool"))?;
        }
        Ok(())
    }

    fn live_session(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let session = self.sessions.get(key)?.clone();
        if matches!(session.state(), SessionState::Ready) {
            Some(session)
        } else {
            None
        }
    }

    /// Close and remove every session of a namespace.
    pub async fn clear_namespace(&self, namespace_id: &str) {
        let keys: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|entry| entry.key().namespace_id == namespace_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            self.evict(&key).await;
        }
    }

    /// Close and remove one session.
    pub async fn clear_server(&self, namespace_id: &str, server_id: &str) {
        let key = SessionKey {
            namespace_id: namespace_id.to_string(),
            server_id: server_id.to_string(),
        };
        self.evict(&key).await;
    }

    async fn evict(&self, key: &SessionKey) {
        if let Some((_, session)) = self.sessions.remove(key) {
            debug!(
                session = %session.id,
                namespace = %key.namespace_id,
                server = %key.server_id,
                "evicting session"
            );
            session.close().await;
        }
    }

    /// Close everything; used on shutdown.
    pub async fn clear_all(&self) {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.evict(&key).await;
        }
    }

    /// Number of pooled sessions, any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no sessions are pooled.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions per namespace, for introspection.
    pub fn counts_by_namespace(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in &self.sessions {
            *counts
                .entry(entry.key().namespace_id.clone())
                .or_insert(0usize) += 1;
        }
        counts
    }

    /// Spawn the optional idle reaper. Eviction races against `get` are
    /// resolved by the per-key creation mutex: a reaped entry is simply
    /// recreated on the next `get`.
    pub fn spawn_reaper(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let idle = self.options.idle_timeout?;
        let pool = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(idle.min(Duration::from_secs(60)));
            loop {
                ticker.tick().await;
                let cutoff = now_epoch() - idle.as_secs() as i64;
                let stale: Vec<SessionKey> = pool
                    .sessions
                    .iter()
                    .filter(|entry| entry.value().last_used() < cutoff)
                    .map(|entry| entry.key().clone())
                    .collect();
                for key in stale {
                    debug!(
                        namespace = %key.namespace_id,
                        server = %key.server_id,
                        "reaping idle session"
                    );
                    pool.evict(&key).await;
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;
    use pretty_assertions::assert_eq;

    fn cat_server(id: &str) -> McpServer {
        McpServer {
            id: id.into(),
            org: "org-1".into(),
            name: format!("{id}-name"),
            protocol: Protocol::Stdio,
            url: None,
            send_url: None,
            command: Some("cat".into()),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            headers: HashMap::new(),
            auth_token: None,
            timeout_secs: 5,
            max_retries: 0,
            health_check_url: None,
            active: true,
        }
    }

    fn pool_without_handshake() -> SessionPool {
        SessionPool::new(PoolOptions {
            handshake: false,
            ..PoolOptions::default()
        })
    }

    #[tokio::test]
    async fn get_creates_then_reuses() {
        let pool = pool_without_handshake();
        let server = cat_server("srv-1");

        let first = pool.get("ns-1", &server).await.unwrap();
        assert_eq!(first.state(), SessionState::Ready);
        assert_eq!(pool.len(), 1);

        let second = pool.get("ns-1", &server).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_gets_share_one_session() {
        let pool = Arc::new(pool_without_handshake());
        let server = cat_server("srv-1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let server = server.clone();
            handles.push(tokio::spawn(async move {
                pool.get("ns-1", &server).await.unwrap().id
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1, "all callers must observe the same session");
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_get_distinct_sessions() {
        let pool = pool_without_handshake();
        let a = pool.get("ns-1", &cat_server("srv-1")).await.unwrap();
        let b = pool.get("ns-2", &cat_server("srv-1")).await.unwrap();
        let c = pool.get("ns-1", &cat_server("srv-2")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn failed_creation_leaves_no_entry() {
        let pool = pool_without_handshake();
        let mut server = cat_server("srv-broken");
        server.command = Some("definitely-not-a-real-binary-7b3f".into());

        assert!(pool.get("ns-1", &server).await.is_err());
        assert!(pool.is_empty(), "failed creation must not leak an entry");
    }

    #[tokio::test]
    async fn clear_namespace_evicts_only_that_namespace() {
        let pool = pool_without_handshake();
        pool.get("ns-1", &cat_server("srv-1")).await.unwrap();
        pool.get("ns-1", &cat_server("srv-2")).await.unwrap();
        pool.get("ns-2", &cat_server("srv-1")).await.unwrap();

        pool.clear_namespace("ns-1").await;
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.counts_by_namespace().get("ns-2"), Some(&1));
    }

    #[tokio::test]
    async fn clear_server_then_get_recreates() {
        let pool = pool_without_handshake();
        let server = cat_server("srv-1");
        let first = pool.get("ns-1", &server).await.unwrap();
        pool.clear_server("ns-1", "srv-1").await;
        assert!(pool.is_empty());

        let second = pool.get("ns-1", &server).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn session_requests_are_serialised() {
        let pool = pool_without_handshake();
        let server = cat_server("srv-1");
        let session = pool.get("ns-1", &server).await.unwrap();

        // `cat` echoes request frames; they carry no result so `request`
        // would block. Drive `send` directly to exercise the serial path.
        session
            .send(&serde_json::json!({"jsonrpc": "2.0", "method": "a"}))
            .await
            .unwrap();
        session
            .send(&serde_json::json!({"jsonrpc": "2.0", "method": "b"}))
            .await
            .unwrap();
        assert!(session.last_used() > 0);
    }
}
