//! Error types for resource API calls

/// Classified failure of a downstream operation.
///
/// `Network`, `Api` and `Http` are only produced after the retry budget is
/// spent (or for a non-retryable failure); `Auth` is never retried.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("HTTP {status} {status_text}")]
    Http { status: u16, status_text: String },

    #[error("response envelope carried no body")]
    EmptyBody,

    #[error("response body did not match the expected type: {0}")]
    Decode(String),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] thermolink_auth::Error),
}

impl ClientError {
    /// Whether the caller has to run a full login before trying again.
    pub fn requires_login(&self) -> bool {
        matches!(self, ClientError::Auth(e) if e.requires_login())
    }
}

/// Result alias for resource API calls.
pub type Result<T> = std::result::Result<T, ClientError>;
