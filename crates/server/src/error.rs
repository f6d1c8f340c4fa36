use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use opsgate_core::{ProxyError, UpstreamError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Proxy(ProxyError::InvalidParameters(_)) => StatusCode::BAD_REQUEST,
            Self::Proxy(error) => match error.upstream() {
                Some(UpstreamError::NotFound(_)) => StatusCode::NOT_FOUND,
                Some(UpstreamError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use opsgate_core::{ProxyError, UpstreamError};

    use super::ApiError;

    #[test]
    fn proxy_failures_map_to_gateway_statuses() {
        let cases = [
            (ProxyError::InvalidParameters("namespace".into()), StatusCode::BAD_REQUEST),
            (
                ProxyError::ControlPlane(UpstreamError::NotFound("site".into())),
                StatusCode::NOT_FOUND,
            ),
            (ProxyError::ClusterQuery(UpstreamError::Timeout(20)), StatusCode::GATEWAY_TIMEOUT),
            (
                ProxyError::ClusterCredential(UpstreamError::Auth("denied".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ProxyError::ControlPlane(UpstreamError::Status {
                    status: 500,
                    message: "boom".into(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }

    #[test]
    fn unauthorized_body_is_fixed() {
        assert_eq!(ApiError::Unauthorized.to_string(), "Unauthorized");
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }
}
