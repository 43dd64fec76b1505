use thiserror::Error;

/// Credential refresh failures.
///
/// `Clone` because the single-flight refresh broadcasts one outcome to
/// every waiter.
#[derive(Debug, Clone, Error)]
pub enum OAuthError {
    /// The authorization server rejected the grant (4xx, e.g.
    /// `invalid_grant`). Terminal: retrying cannot succeed until the user
    /// logs in again.
    #[error("OAuth credentials revoked: {0}")]
    Revoked(String),

    /// Transient failure (5xx, network error, timeout). The next request
    /// attempt starts a fresh refresh.
    #[error("Token refresh failed: {0}")]
    Transient(String),

    /// No credentials on disk or in memory.
    #[error("No OAuth credentials available")]
    MissingCredentials,
}

impl OAuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<OAuthError> for crate::LlmError {
    fn from(error: OAuthError) -> Self {
        match error {
            OAuthError::Revoked(_) | OAuthError::MissingCredentials => {
                Self::AuthenticationFailed(error.to_string())
            }
            OAuthError::Transient(_) => Self::ServiceUnavailable(error.to_string()),
        }
    }
}
