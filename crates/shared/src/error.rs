use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ItemId;

/// Machine-readable reason carried in a backend error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    Unavailable,
    Internal,
}

impl ErrorCode {
    /// Codes after which the stored credential should not be trusted.
    pub fn is_auth(self) -> bool {
        matches!(self, Self::Unauthorized | Self::Forbidden)
    }
}

/// Error body returned by the backend alongside a non-success status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct ApiException {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError::new(code, message).into()
    }

    pub fn item_not_found(id: &ItemId) -> Self {
        Self::new(ErrorCode::NotFound, format!("item {id} not found"))
    }
}

impl From<ApiError> for ApiException {
    fn from(ApiError { code, message }: ApiError) -> Self {
        Self { code, message }
    }
}

impl From<ApiException> for ApiError {
    fn from(ApiException { code, message }: ApiException) -> Self {
        Self { code, message }
    }
}
