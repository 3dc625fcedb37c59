//! Movie endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::http::error::ApiError;
use crate::http::handlers::read_json;
use crate::http::server::AppState;
use crate::models::movie::validate_movie;
use crate::models::{Movie, MoviePatch, NewMovie, Validator};
use crate::resilience::timeouts::with_deadline;
use crate::store::update_versioned;

pub const X_EXPECTED_VERSION: &str = "x-expected-version";

/// Parse a path id. Anything that is not a positive integer names no movie.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::NotFound),
    }
}

fn expected_version(headers: &HeaderMap) -> Result<Option<i32>, ApiError> {
    let Some(value) = headers.get(X_EXPECTED_VERSION) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest("X-Expected-Version must be an integer".into()))
}

/// `POST /v1/movies`
pub async fn create_movie(
    State(state): State<AppState>,
    payload: Result<Json<NewMovie>, JsonRejection>,
) -> Result<Response, ApiError> {
    let movie = read_json(payload)?.into_movie();

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let movie = with_deadline(state.operation_timeout, state.movies.insert(movie)).await?;
    tracing::info!(movie_id = movie.id, "Movie created");

    let location = HeaderValue::from_str(&format!("/v1/movies/{}", movie.id))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "movie": movie })),
    )
        .into_response())
}

/// `GET /v1/movies/{id}`
pub async fn show_movie(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    let movie = with_deadline(state.operation_timeout, state.movies.get(id)).await?;
    Ok(Json(json!({ "movie": movie })).into_response())
}

/// `PATCH /v1/movies/{id}`
///
/// Applies a partial update under optimistic concurrency control. A 409
/// means someone else changed the movie since it was read; the client
/// should fetch it again and resubmit. The body is only decoded once the
/// movie is known to exist, so a missing id is 404 whatever was sent.
pub async fn update_movie(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<MoviePatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    let expected = expected_version(&headers)?;

    let movie = update_versioned(
        state.movies.as_ref(),
        id,
        expected,
        state.operation_timeout,
        |movie: &mut Movie| {
            read_json(payload)?.apply(movie);
            let mut v = Validator::new();
            validate_movie(&mut v, movie);
            if v.valid() {
                Ok(())
            } else {
                Err(ApiError::FailedValidation(v.into_errors()))
            }
        },
    )
    .await?;

    tracing::info!(movie_id = movie.id, version = movie.version, "Movie updated");
    Ok(Json(json!({ "movie": movie })).into_response())
}

/// `DELETE /v1/movies/{id}`
pub async fn delete_movie(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    with_deadline(state.operation_timeout, state.movies.delete(id)).await?;
    tracing::info!(movie_id = id, "Movie deleted");
    Ok(Json(json!({ "message": "movie successfully deleted" })).into_response())
}
