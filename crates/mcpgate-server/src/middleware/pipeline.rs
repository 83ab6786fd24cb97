//! The per-endpoint stage chain.
//!
//! Runs in front of the endpoint router: lookup, auth, endpoint rate limit,
//! endpoint CORS, path rewrite, transport tagging and session-id handling,
//! in that order. A stage either short-circuits with a response or annotates
//! the [`RequestCtx`] carried in the request extensions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, OriginalUri, Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::rate::{apply_rate_headers, client_ip, rate_limited_response};
use crate::middleware::{RequestCtx, TransportClass, authenticate};
use crate::ratelimit::RateDecision;
use crate::state::GatewayState;
use mcpgate_core::EndpointCors;
use mcpgate_protocol::{ErrorKind, GatewayError};

/// Header carrying the nominated upstream after a servers-prefix rewrite.
pub const SERVER_ID_HEADER: &str = "x-mcp-server-id";
/// Inbound session identity header.
pub const SESSION_HEADER: &str = "x-session-id";
/// Outbound header echoing generated session ids.
pub const SET_SESSION_HEADER: &str = "set-session-id";

/// Endpoint name from the original (pre-nesting) URI:
/// `/api/public/endpoints/{name}/…`.
fn endpoint_name(original: &Uri) -> Option<String> {
    let mut segments = original.path().trim_start_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("api"), Some("public"), Some("endpoints")) => {
            segments.next().map(str::to_string).filter(|s| !s.is_empty())
        }
        _ => None,
    }
}

/// Origin allowed by a CORS policy?
fn origin_allowed(cors: &EndpointCors, origin: &str) -> bool {
    cors.origins.iter().any(|o| o == "*" || o == origin)
}

fn preflight_response(cors: &EndpointCors, origin: Option<&str>, request_headers: Option<&HeaderValue>) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    if let Some(origin) = origin
        && origin_allowed(cors, origin)
        && let Ok(value) = HeaderValue::from_str(origin)
    {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    let methods = if cors.methods.is_empty() {
        "GET, POST, OPTIONS".to_string()
    } else {
        cors.methods.join(", ")
    };
    if let Ok(value) = HeaderValue::from_str(&methods) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
    }
    if let Some(requested) = request_headers {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("3600"),
    );
    response
}

/// Stages 5-11, composed.
pub async fn endpoint_pipeline(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    // Stage 5: endpoint lookup.
    let original_uri = request
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| request.uri().clone(), |original| original.0.clone());
    let Some(name) = endpoint_name(&original_uri) else {
        return ApiError(GatewayError::new(
            ErrorKind::InvalidEndpointName,
            "missing endpoint name",
        ))
        .into_response();
    };
    let resolved = match state.resolver.resolve(&name).await {
        Ok(resolved) => resolved,
        Err(e) => return ApiError(e).into_response(),
    };

    // Stage 6: endpoint auth.
    let query = request.uri().query().map(str::to_string);
    let auth = match authenticate(
        &state,
        &resolved.endpoint,
        request.headers(),
        query.as_deref(),
    )
    .await
    {
        Ok(auth) => auth,
        Err(e) => return ApiError(e).into_response(),
    };

    // Stage 7: endpoint rate limit, keyed by endpoint id + client IP.
    let mut rate_decision: Option<RateDecision> = None;
    if let Some(limit) = &resolved.endpoint.rate_limit {
        let limiter = state.endpoint_limiter(
            &resolved.endpoint.id,
            limit.requests,
            Duration::from_secs(limit.window_secs),
        );
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        let ip = client_ip(request.headers(), peer);
        let key = format!("ep:{}:{ip}", resolved.endpoint.id);
        let decision = limiter.check(&key).await;
        if !decision.allowed {
            tracing::debug!(endpoint = %name, %ip, "endpoint rate limit exceeded");
            return rate_limited_response(&decision);
        }
        rate_decision = Some(decision);
    }

    // Stage 8: endpoint CORS.
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let cors_policy = resolved.endpoint.cors.clone();
    if let Some(cors) = &cors_policy {
        if request.method() == Method::OPTIONS {
            let requested = request
                .headers()
                .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
                .cloned();
            return preflight_response(cors, origin.as_deref(), requested.as_ref());
        }
        if !cors.methods.is_empty()
            && !cors
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(request.method().as_str()))
        {
            return ApiError(GatewayError::new(
                ErrorKind::ScopeDenied,
                "method not allowed by endpoint CORS policy",
            ))
            .into_response();
        }
    }

    // Stage 9: path rewrite. First matching rule wins; a request already
    // marked rewritten is never re-evaluated.
    let mut server_id = request
        .headers()
        .get(SERVER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut original_path = None;
    let mut rewritten = request
        .extensions()
        .get::<RequestCtx>()
        .is_some_and(|ctx| ctx.rewritten);
    if !rewritten
        && let Some(outcome) = state.rewrite_table.apply(request.uri().path())
    {
        original_path = Some(request.uri().path().to_string());
        if let Some(id) = &outcome.server_id {
            server_id = Some(id.clone());
        }
        for (header_name, value) in &outcome.headers {
            if let (Ok(header_name), Ok(value)) = (
                HeaderName::from_bytes(header_name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                request.headers_mut().insert(header_name, value);
            }
        }
        let new_path_and_query = match request.uri().query() {
            Some(query) => format!("{}?{query}", outcome.path),
            None => outcome.path.clone(),
        };
        match new_path_and_query.parse::<Uri>() {
            Ok(new_uri) => *request.uri_mut() = new_uri,
            Err(e) => {
                return ApiError(GatewayError::internal(format!("rewrite produced bad uri: {e}")))
                    .into_response();
            }
        }
        rewritten = true;
    }

    // Stage 10: transport classification from the (possibly rewritten) path.
    let transport = TransportClass::from_path(request.uri().path());

    // Stage 11: session identity for stateful transports.
    let mut session_id = None;
    let mut generated_session = false;
    if transport.is_stateful() {
        let from_header = request
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let from_query = query.as_deref().and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("session_id="))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        });
        session_id = from_header.or(from_query);
        if session_id.is_none() {
            session_id = Some(Uuid::new_v4().to_string());
            generated_session = true;
        }
    }

    request.extensions_mut().insert(RequestCtx {
        resolved,
        auth,
        server_id,
        original_path,
        rewritten,
        transport,
        session_id: session_id.clone(),
    });

    let mut response = next.run(request).await;

    if let Some(decision) = &rate_decision {
        apply_rate_headers(&mut response, decision);
    }
    if generated_session
        && let Some(session) = session_id
        && let Ok(value) = HeaderValue::from_str(&session)
    {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SET_SESSION_HEADER), value);
    }
    if let (Some(cors), Some(origin)) = (&cors_policy, origin.as_deref())
        && origin_allowed(cors, origin)
        && let Ok(value) = HeaderValue::from_str(origin)
    {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn endpoint_name_extraction() {
        let uri: Uri = "/api/public/endpoints/demo/tools".parse().unwrap();
        assert_eq!(endpoint_name(&uri).as_deref(), Some("demo"));

        let uri: Uri = "/api/public/endpoints/demo".parse().unwrap();
        assert_eq!(endpoint_name(&uri).as_deref(), Some("demo"));

        let uri: Uri = "/health".parse().unwrap();
        assert_eq!(endpoint_name(&uri), None);

        let uri: Uri = "/api/public/endpoints".parse().unwrap();
        assert_eq!(endpoint_name(&uri), None);
    }

    #[test]
    fn cors_origin_matching() {
        let cors = EndpointCors {
            origins: vec!["https://app.example.com".into()],
            methods: vec![],
        };
        assert!(origin_allowed(&cors, "https://app.example.com"));
        assert!(!origin_allowed(&cors, "https://other.example.com"));

        let any = EndpointCors {
            origins: vec!["*".into()],
            methods: vec![],
        };
        assert!(origin_allowed(&any, "https://anything.example"));
    }
}
