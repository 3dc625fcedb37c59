//! Bearer token authentication.
//!
//! Resolves the `Authorization` header to a [`Principal`] and stores it in
//! the request extensions. No header means the anonymous principal; a
//! malformed header or an unknown token ends the request with 401; a
//! credential store failure ends it with 500.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::models::{Fingerprint, Principal, Scope};
use crate::resilience::timeouts::with_deadline;
use crate::store::StoreError;

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = match resolve_principal(&state, request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    };

    // Caches must not serve an authenticated response to an anonymous caller or vice versa.
    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

async fn resolve_principal(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(Principal::Anonymous);
    };

    let plaintext = bearer_token(value).ok_or(ApiError::InvalidCredentials)?;
    let fingerprint = Fingerprint::of(plaintext);

    let lookup = state
        .credentials
        .user_for_token(Scope::Authentication, &fingerprint);
    match with_deadline(state.operation_timeout, lookup).await {
        Ok(user) => {
            tracing::debug!(user_id = user.id, "Authenticated request");
            Ok(Principal::user(user))
        }
        Err(StoreError::NotFound) => Err(ApiError::InvalidAuthenticationToken),
        Err(err) => Err(ApiError::Internal(format!("credential lookup failed: {err}"))),
    }
}

/// Extract `<token>` from `Bearer <token>`. Anything else is malformed.
fn bearer_token(value: &HeaderValue) -> Option<&str> {
    let value = value.to_str().ok()?;
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}
