use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Policy violations (budget, loop, window) that carry a stable code
    #[error("{message}")]
    Policy { code: &'static str, message: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn policy(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::Policy {
            code,
            message: message.into(),
        }
    }

    /// Stable machine-readable code used in every error body
    pub fn code(&self) -> &str {
        match self {
            ApiError::Policy { code, .. } => code,
            ApiError::BadRequest(_) => "bad_request",
            ApiError::AccessDenied(_) => "ACCESS_DENIED",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::MissingConfig(_) => "configuration_missing",
            ApiError::UpstreamTimeout(_) => "upstream_timeout",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Policy { .. } | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::MissingConfig(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message without the variant prefix, for structured bodies
    pub fn detail(&self) -> String {
        match self {
            ApiError::Policy { message, .. } => message.clone(),
            ApiError::BadRequest(m)
            | ApiError::AccessDenied(m)
            | ApiError::NotFound(m)
            | ApiError::RateLimited(m)
            | ApiError::Upstream(m)
            | ApiError::MissingConfig(m)
            | ApiError::UpstreamTimeout(m)
            | ApiError::Internal(m) => m.clone(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Internal(msg) | ApiError::Upstream(msg) => {
                tracing::error!(code = self.code(), "{}", msg);
            }
            _ => {
                tracing::warn!(code = self.code(), "{}", self.detail());
            }
        }

        let body = Json(ErrorBody {
            code: self.code().to_string(),
            message: self.detail(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_keep_their_code() {
        let err = ApiError::policy("CONTEXT_BUDGET_EXCEEDED", "token budget exhausted");
        assert_eq!(err.code(), "CONTEXT_BUDGET_EXCEEDED");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::AccessDenied("doc_1".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::RateLimited("bucket".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::MissingConfig("api key".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::UpstreamTimeout("retrieval".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
