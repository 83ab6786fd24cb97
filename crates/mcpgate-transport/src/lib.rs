//! Upstream transport drivers.
//!
//! One driver per wire transport, all behind the [`Driver`] sum type: a
//! spawned-subprocess STDIO driver, a streamable-HTTP driver, an SSE driver
//! with reconnect, and a WebSocket driver. There are exactly four kinds and
//! all are known at build time, so dispatch is a `match`, not a vtable; the
//! one capability difference (STDIO cannot multiplex) is surfaced through
//! [`Driver::supports_sync_request`].

pub mod backoff;
pub mod config;
pub mod driver;
pub mod error;
pub mod sse;
pub mod stdio;
pub mod streamable;
pub mod websocket;

pub use backoff::BackoffPolicy;
pub use config::{DriverOptions, TransportConfig, TransportKind};
pub use driver::{Driver, DriverState};
pub use error::{TransportError, TransportResult};
pub use sse::SseDriver;
pub use stdio::StdioDriver;
pub use streamable::StreamableDriver;
pub use websocket::WebSocketDriver;
