use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    auth::{jwt::TokenError, password::HashingError, policy::PolicyViolation, services::AuthError},
    db::StoreError,
};

/// Error returned by every handler. The message is what the client sees;
/// internal detail is logged where the error is created.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Internal server error")]
    Internal,
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_credentials() -> Self {
        Self::Unauthorized("Invalid credentials".into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound("Not found".into()),
            StoreError::DuplicateEmail => Self::Conflict("Email already registered".into()),
            StoreError::DuplicateUsername => Self::Conflict("Username already taken".into()),
            StoreError::UsernameLocked => {
                Self::Conflict("Username cannot be changed while you have posts".into())
            }
            StoreError::Database(e) => {
                error!(error = %e, "store failure");
                Self::Internal
            }
        }
    }
}

impl From<HashingError> for AppError {
    fn from(e: HashingError) -> Self {
        error!(error = %e, "password hashing failure");
        Self::Internal
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(e) => {
                error!(error = %e, "jwt signing failure");
                Self::Internal
            }
            TokenError::Expired => Self::Unauthorized("Token expired".into()),
            TokenError::Invalid(_) => Self::Unauthorized("Invalid token".into()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::UserNotFound | AuthError::InvalidCredentials => Self::invalid_credentials(),
            AuthError::Hashing(e) => e.into(),
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<PolicyViolation> for AppError {
    fn from(e: PolicyViolation) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        warn!(error = %e, "rejected request body");
        Self::validation("Invalid request payload")
    }
}
