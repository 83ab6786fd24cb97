//! The client-facing SSE channel.
//!
//! `GET /sse` opens an event stream: the first event is an `endpoint` event
//! pointing the client at the message channel (the streamable-HTTP URL with
//! the session id attached); after that the stream is kept alive with
//! comments until the client disconnects.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt, stream};

use crate::middleware::RequestCtx;
use crate::state::GatewayState;
use mcpgate_core::EndpointResolver;

/// `GET /sse`.
pub async fn handle_sse(
    State(state): State<Arc<GatewayState>>,
    Extension(ctx): Extension<RequestCtx>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let urls = EndpointResolver::public_urls(&state.config.base_url, &ctx.resolved.endpoint.name);
    let message_url = match &ctx.session_id {
        Some(session) => format!("{}?session_id={session}", urls.mcp),
        None => urls.mcp,
    };
    tracing::debug!(
        endpoint = %ctx.resolved.endpoint.name,
        session = ?ctx.session_id,
        "sse channel opened"
    );

    let endpoint_event = Event::default().event("endpoint").data(message_url);
    let stream = stream::once(async move { Ok(endpoint_event) }).chain(stream::pending());

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
