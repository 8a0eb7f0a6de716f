use thiserror::Error;

/// Errors surfaced by the session service.
///
/// `Clone` because every caller joined to a single-flight refresh receives
/// the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Bad login/registration input, or the server rejected the credentials.
    #[error("{0}")]
    Credential(String),

    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("no user logged in")]
    NotAuthenticated,

    /// Refresh failed and the session was torn down; re-authenticate.
    #[error("Session expired. Please log in again.")]
    SessionExpired,

    #[error("{0}")]
    RequestFailed(String),

    #[error("Credential storage unavailable: {0}")]
    Storage(String),
}

impl SessionError {
    /// Operation attempted without a session
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SessionError::NoRefreshToken | SessionError::NotAuthenticated)
    }

    /// The caller must send the user back to the login entry point
    pub fn requires_login(&self) -> bool {
        matches!(self, SessionError::SessionExpired) || self.is_auth_error()
    }
}

/// Storage backend failures. These only select the next backend in the
/// fallback chain; callers see `Exhausted` when no backend is usable.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{backend} unavailable: {reason}")]
    Unavailable { backend: &'static str, reason: String },

    #[error("corrupt {backend} data: {reason}")]
    Corrupt { backend: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no storage backend accepted '{key}'")]
    Exhausted { key: String },
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::Storage(err.to_string())
    }
}
