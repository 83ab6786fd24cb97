//! Global per-IP rate limiting and client-IP extraction.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::ratelimit::RateDecision;
use crate::state::GatewayState;

/// Paths that bypass the global limiter.
const SKIP_PATHS: &[&str] = &["/health", "/metrics"];

/// Client IP: `X-Real-IP`, else the first `X-Forwarded-For` hop, else the
/// socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

/// The 429 response shape shared by both limiter stages.
pub fn rate_limited_response(decision: &RateDecision) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "rate_limit_exceeded",
            "retry_after": decision.reset_epoch,
        })),
    )
        .into_response();
    apply_rate_headers(&mut response, decision);
    if let Ok(value) = decision.retry_after_secs().to_string().parse() {
        response.headers_mut().insert("retry-after", value);
    }
    response
}

/// Attach `X-RateLimit-*` headers to a response.
pub fn apply_rate_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = decision.limit.to_string().parse() {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = decision.remaining.to_string().parse() {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = decision.reset_epoch.to_string().parse() {
        headers.insert("x-ratelimit-reset", value);
    }
}

/// Stage 3: global fixed-window limit keyed by client IP.
pub async fn global_rate_limit(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if SKIP_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }
    let Some(limiter) = &state.global_limiter else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = client_ip(request.headers(), peer);
    let decision = limiter.check(&format!("ip:{ip}")).await;
    if !decision.allowed {
        tracing::debug!(%ip, "global rate limit exceeded");
        return rate_limited_response(&decision);
    }
    next.run(request).await
}
