//! Endpoints about the calling user and their authentication tokens.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Duration;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::handlers::{blocking, read_json};
use crate::http::server::AppState;
use crate::models::user::{validate_email, validate_password_plaintext};
use crate::models::{Principal, Scope, Token, Validator};
use crate::resilience::timeouts::with_deadline;
use crate::security::access_control::{activated_user, authenticated_user};
use crate::security::password::verify_password;
use crate::store::StoreError;

const AUTHENTICATION_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// `GET /v1/users/me`
pub async fn show_current_user(Extension(principal): Extension<Principal>) -> Result<Json<Value>, ApiError> {
    let user = activated_user(&principal)?;
    Ok(Json(json!({ "user": user })))
}

/// `POST /v1/tokens/authentication`: exchange email and password for a bearer token.
///
/// Unknown email and wrong password are the same 401. Inactive users still
/// get a token; the activation gate turns them away per route.
pub async fn create_authentication_token(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let input = read_json(payload)?;

    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let account = match with_deadline(state.operation_timeout, state.users.by_email(&input.email)).await {
        Ok(account) => account,
        Err(StoreError::NotFound) => return Err(ApiError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };

    let password = input.password;
    let hash = account.password_hash;
    let matches = blocking(move || verify_password(&password, &hash))
        .await?
        .map_err(|e| ApiError::Internal(format!("stored password hash unusable: {e}")))?;
    if !matches {
        tracing::debug!(user_id = account.user.id, "Password mismatch");
        return Err(ApiError::InvalidCredentials);
    }

    let token = Token::generate(
        account.user.id,
        Duration::hours(AUTHENTICATION_TOKEN_TTL_HOURS),
        Scope::Authentication,
    );
    with_deadline(state.operation_timeout, state.credentials.save_token(&token)).await?;

    tracing::info!(user_id = account.user.id, expiry = %token.expiry, "Issued authentication token");
    Ok((StatusCode::CREATED, Json(json!({ "authentication_token": token }))))
}

/// `DELETE /v1/tokens/authentication`: revoke every authentication token of the caller.
pub async fn revoke_authentication_tokens(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, ApiError> {
    let user_id = authenticated_user(&principal)?.id;
    let revoked = with_deadline(
        state.operation_timeout,
        state.credentials.delete_all_for_user(Scope::Authentication, user_id),
    )
    .await?;

    tracing::info!(user_id, revoked, "Revoked authentication tokens");
    Ok(Json(json!({ "message": "authentication tokens revoked", "revoked": revoked })))
}
