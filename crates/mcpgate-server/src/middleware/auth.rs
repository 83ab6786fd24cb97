//! Endpoint authentication.
//!
//! Order matters: an inactive endpoint rejects first, a public endpoint
//! passes without credentials, API-key auth is tried before OAuth, and a
//! request that satisfies neither is rejected with missing credentials.

use axum::http::HeaderMap;

use crate::middleware::AuthIdentity;
use crate::state::GatewayState;
use mcpgate_core::Endpoint;
use mcpgate_protocol::{ErrorKind, GatewayError, GatewayResult};

/// Bearer token from an `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// `api_key` query parameter.
fn query_api_key(query: Option<&str>) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("api_key=")
            && !value.is_empty()
        {
            return Some(value.to_string());
        }
    }
    None
}

/// Run the endpoint auth algorithm against one request.
pub async fn authenticate(
    state: &GatewayState,
    endpoint: &Endpoint,
    headers: &HeaderMap,
    query: Option<&str>,
) -> GatewayResult<AuthIdentity> {
    if !endpoint.active {
        return Err(GatewayError::new(
            ErrorKind::InactiveEndpoint,
            "endpoint not active",
        ));
    }
    if endpoint.auth.public {
        return Ok(AuthIdentity::Anonymous);
    }

    // API-key auth: X-API-Key header, else bearer, else the query parameter
    // when enabled.
    if endpoint.auth.api_key {
        let candidate = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| bearer_token(headers).map(str::to_string))
            .or_else(|| {
                endpoint
                    .auth
                    .use_query_param
                    .then(|| query_api_key(query))
                    .flatten()
            });
        if let Some(key) = candidate
            && let Some(identity) = state
                .store
                .validate_api_key(&key)
                .await
                .map_err(|e| e.with_component("auth"))?
        {
            return Ok(AuthIdentity::ApiKey(identity));
        }
    }

    // OAuth: a bearer token checked against the validation collaborator.
    if endpoint.auth.oauth
        && let Some(validator) = &state.token_validator
        && let Some(token) = bearer_token(headers)
        && let Some(identity) = validator
            .validate(token)
            .await
            .map_err(|e| e.with_component("auth"))?
    {
        return Ok(AuthIdentity::Oauth(identity));
    }

    Err(GatewayError::new(
        ErrorKind::MissingCredentials,
        "authentication required",
    ))
}
