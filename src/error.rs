use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::error;

use crate::auth::repo::StoreError;

/// Failures raised by the registration and authentication workflows.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Error: Username is already taken!")]
    DuplicateUsername,

    #[error("Error: Email is already in use!")]
    DuplicateEmail,

    #[error("Error: Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Authentication failed: Bad credentials")]
    BadCredentials,

    // Same text as BadCredentials so callers cannot tell which accounts exist.
    #[error("Authentication failed: Bad credentials")]
    UserNotFound,

    #[error("Authentication failed: User is disabled")]
    Disabled,

    #[error("Authentication failed: Full authentication is required to access this resource")]
    Unauthenticated,

    #[error("An unexpected error occurred")]
    Unexpected(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::DuplicateUsername
            | AuthError::DuplicateEmail
            | AuthError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            AuthError::BadCredentials
            | AuthError::UserNotFound
            | AuthError::Disabled
            | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Binds the error to the request path reported in the error body.
    pub fn at(self, path: impl Into<String>) -> ApiError {
        ApiError {
            error: self,
            path: path.into(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UsernameTaken => AuthError::DuplicateUsername,
            StoreError::EmailTaken => AuthError::DuplicateEmail,
            StoreError::Database(e) => AuthError::Unexpected(e.into()),
        }
    }
}

/// Body of every failure response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub message: String,
    pub path: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub error: AuthError,
    pub path: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let AuthError::Unexpected(e) = &self.error {
            error!(error = ?e, path = %self.path, "unexpected failure");
        }
        let status = self.error.status();
        let body = ErrorBody {
            timestamp: OffsetDateTime::now_utc(),
            message: self.error.to_string(),
            path: self.path,
        };
        (status, Json(body)).into_response()
    }
}
