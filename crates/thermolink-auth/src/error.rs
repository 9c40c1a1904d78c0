//! Error types for authentication operations

/// Errors from login, token refresh and token storage.
///
/// `Refresh` and `NotAuthenticated` both mean the caller has to run a full
/// interactive login; everything else aborts the current attempt only.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("login page parse failed: {0}")]
    PageParse(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("authorization redirect failed: {0}")]
    Redirect(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("not authenticated: interactive login required")]
    NotAuthenticated,

    #[error("HTTP request failed: {0}")]
    Network(String),

    #[error("token storage error: {0}")]
    Storage(String),

    #[error("invalid identity provider configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether recovery needs a fresh interactive login rather than a retry.
    pub fn requires_login(&self) -> bool {
        matches!(self, Error::NotAuthenticated | Error::Refresh(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
