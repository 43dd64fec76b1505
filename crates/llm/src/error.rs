use axum::{
    Json,
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Proxy errors with the HTTP status codes they surface as.
///
/// Upstream provider error bodies are never rewritten; they travel through
/// [`LlmError::UpstreamResponse`] and reach the client byte for byte with
/// the upstream status code.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Client body failed wire-format validation, or a parameter exceeds
    /// what the model supports.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No valid credentials, or a refresh failed with `invalid_grant`.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Upstream denied access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Unknown route, provider, or model.
    #[error("{0}")]
    NotFound(String),

    /// Upstream read or write timed out.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Upstream rate limit.
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// Upstream 5xx or a transient credential refresh failure.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Network-level failure talking to the upstream.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A non-2xx upstream response forwarded verbatim.
    #[error("Upstream returned status {status}")]
    UpstreamResponse {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },

    /// Uncaught internal failure. `Some(message)` came from a provider and
    /// may be shown; `None` must not leak details.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl LlmError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable(_) | Self::ConnectionError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamResponse { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error type string used in the JSON envelope.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::PermissionDenied(_) => "permission_error",
            Self::NotFound(_) => "not_found_error",
            Self::Timeout(_) => "timeout_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::ServiceUnavailable(_) | Self::ConnectionError(_) => "service_unavailable_error",
            Self::UpstreamResponse { .. } => "api_error",
            Self::Internal(_) => "internal_server_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(provider_msg)) => provider_msg.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// The `{"error": {"type", "message"}}` envelope used for local failures.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    r#type: String,
    message: String,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        if let Self::UpstreamResponse {
            status,
            content_type,
            body,
        } = self
        {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = content_type.unwrap_or_else(|| "application/json".to_string());

            return (status, [(http::header::CONTENT_TYPE, content_type)], body).into_response();
        }

        let status = self.status_code();
        let error_response = ErrorResponse {
            error: ErrorDetails {
                r#type: self.error_type().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::ConnectionError(err.to_string())
        } else {
            Self::Internal(Some(err.to_string()))
        }
    }
}
