//! HTTP translation of gateway errors.
//!
//! Only this layer turns error kinds into status codes; everything below it
//! passes `GatewayError` through unchanged in kind.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use mcpgate_protocol::GatewayError;

/// Wrapper giving `GatewayError` an HTTP shape.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_protocol::ErrorKind;

    #[test]
    fn statuses_follow_kinds() {
        let response =
            ApiError(GatewayError::new(ErrorKind::ToolNotFound, "nope")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            ApiError(GatewayError::new(ErrorKind::PolicyBlock, "blocked")).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response =
            ApiError(GatewayError::new(ErrorKind::UpstreamTimeout, "slow")).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
