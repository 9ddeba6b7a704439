use std::fmt;

use shared::error::ApiException;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend error: {0}")]
    Api(#[from] ApiException),
    #[error("access credential rejected by backend")]
    Unauthorized,
    #[error("failed to decode backend response: {0}")]
    Decode(String),
    #[error("no access credential available; sign in first")]
    NotSignedIn,
    #[error("session is busy: {0}")]
    SessionBusy(String),
    #[error("identity provider failure: {0}")]
    Identity(String),
    #[error("credential store failure: {0}")]
    CredentialStore(String),
    #[error("operation cancelled because its owner was torn down")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Unauthorized | Self::NotSignedIn => true,
            Self::Api(api) => api.code.is_auth(),
            _ => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Transport(value.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// The backend or identity provider refused the sign-in.
    Rejected,
    /// The backend could not be reached.
    Unreachable,
    /// The delegated identity flow failed before reaching the backend.
    Identity,
    /// The credential could not be read or persisted locally.
    CredentialStore,
    Other,
}

/// Why a session ended up signed out. Stored inside the session status so
/// presentation can tell a failure apart from a user-initiated sign-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&ClientError> for SessionError {
    fn from(value: &ClientError) -> Self {
        let kind = match value {
            err if err.is_auth() => SessionErrorKind::Rejected,
            ClientError::Api(_) => SessionErrorKind::Rejected,
            err if err.is_transport() => SessionErrorKind::Unreachable,
            ClientError::Identity(_) => SessionErrorKind::Identity,
            ClientError::CredentialStore(_) => SessionErrorKind::CredentialStore,
            _ => SessionErrorKind::Other,
        };
        Self::new(kind, value.to_string())
    }
}
