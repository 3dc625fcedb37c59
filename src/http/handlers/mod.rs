//! Route handlers.
//!
//! Handlers see a request only after the whole pipeline has admitted it.
//! Storage calls go through `with_deadline`; store errors convert into
//! `ApiError` with `?`.

pub mod account;
pub mod debug;
pub mod healthcheck;
pub mod movies;
pub mod users;

use axum::{extract::rejection::JsonRejection, Json};

use crate::http::error::ApiError;

/// Unwrap a JSON body, turning a rejection into a 400 with axum's message.
pub(crate) fn read_json<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Run CPU-bound work (password hashing) on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))
}
