//! Error responses.
//!
//! Every terminal failure in the pipeline or in a handler is an `ApiError`.
//! Client errors carry a stable status and message; server errors are
//! logged in full and rendered as a generic message.

use std::collections::BTreeMap;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("invalid or expired authentication token")]
    InvalidAuthenticationToken,

    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,

    #[error("your user account must be activated to access this resource")]
    InactiveAccount,

    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,

    #[error("the requested resource could not be found")]
    NotFound,

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("{0}")]
    BadRequest(String),

    #[error("failed validation")]
    FailedValidation(BTreeMap<String, String>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// A 422 carrying a single field error.
    pub fn field(key: &str, message: &str) -> Self {
        ApiError::FailedValidation(BTreeMap::from([(key.to_string(), message.to_string())]))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials
            | ApiError::InvalidAuthenticationToken
            | ApiError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            ApiError::InactiveAccount | ApiError::NotPermitted => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::EditConflict => StatusCode::CONFLICT,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::EditConflict => ApiError::EditConflict,
            StoreError::DuplicateEmail => {
                ApiError::field("email", "a user with this email address already exists")
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed with internal error");
                json!({ "error": SERVER_ERROR_MESSAGE })
            }
            ApiError::FailedValidation(fields) => json!({ "error": fields }),
            other => json!({ "error": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(
            self,
            ApiError::InvalidCredentials | ApiError::InvalidAuthenticationToken
        ) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
