//! Registration and activation.
//!
//! ```text
//! POST /v1/users           → 201, inactive user, activation token mailed
//! POST /v1/users/activate  → activation token consumed, user activated
//! ```

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::handlers::{blocking, read_json};
use crate::http::server::AppState;
use crate::models::user::{validate_token_plaintext, validate_user};
use crate::models::{Fingerprint, Scope, Token, User, Validator};
use crate::resilience::timeouts::with_deadline;
use crate::security::password::hash_password;
use crate::store::StoreError;

/// Permissions every new account starts with.
pub const DEFAULT_PERMISSIONS: [&str; 1] = ["movies:read"];

const ACTIVATION_TOKEN_TTL_DAYS: i64 = 3;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivateUser {
    pub token: String,
}

/// `POST /v1/users`
pub async fn register_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterUser>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let input = read_json(payload)?;

    let mut v = Validator::new();
    validate_user(&mut v, &input.name, &input.email, &input.password);
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let password = input.password;
    let password_hash = blocking(move || hash_password(&password))
        .await?
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {e}")))?;

    let user = User {
        id: 0,
        created_at: Utc::now(),
        name: input.name,
        email: input.email,
        activated: false,
        version: 0,
    };
    let user = with_deadline(state.operation_timeout, state.users.register(user, password_hash)).await?;
    with_deadline(
        state.operation_timeout,
        state.permissions.grant(user.id, &DEFAULT_PERMISSIONS),
    )
    .await?;

    let token = Token::generate(
        user.id,
        Duration::days(ACTIVATION_TOKEN_TTL_DAYS),
        Scope::Activation,
    );
    with_deadline(state.operation_timeout, state.credentials.save_token(&token)).await?;
    tracing::info!(user_id = user.id, "User registered");

    // The account exists either way; a lost mail only delays activation.
    if let Err(e) = state.mailer.send_activation(&user, &token).await {
        tracing::error!(user_id = user.id, error = %e, "Failed to send activation mail");
    }

    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

/// `POST /v1/users/activate`
pub async fn activate_user(
    State(state): State<AppState>,
    payload: Result<Json<ActivateUser>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let input = read_json(payload)?;

    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &input.token);
    if !v.valid() {
        return Err(ApiError::FailedValidation(v.into_errors()));
    }

    let fingerprint = Fingerprint::of(&input.token);
    let owner = match with_deadline(
        state.operation_timeout,
        state.credentials.user_for_token(Scope::Activation, &fingerprint),
    )
    .await
    {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            return Err(ApiError::field("token", "invalid or expired activation token"))
        }
        Err(e) => return Err(e.into()),
    };

    let user = with_deadline(state.operation_timeout, state.users.activate(owner.id)).await?;
    with_deadline(
        state.operation_timeout,
        state.credentials.delete_all_for_user(Scope::Activation, user.id),
    )
    .await?;

    tracing::info!(user_id = user.id, "User activated");
    Ok(Json(json!({ "user": user })))
}
