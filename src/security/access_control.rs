//! Authorization gates.
//!
//! Each gate reads the [`Principal`] left by the authenticator and either
//! runs the wrapped handler or ends the request. The gates nest:
//! permission implies activated, activated implies authenticated.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::models::{Principal, User};
use crate::resilience::timeouts::with_deadline;
use crate::store::PermissionStore;

fn principal(request: &Request<Body>) -> Result<&Principal, ApiError> {
    request
        .extensions()
        .get::<Principal>()
        .ok_or_else(|| ApiError::Internal("authorization gate reached without a principal".into()))
}

pub fn authenticated_user(principal: &Principal) -> Result<&User, ApiError> {
    principal.as_user().ok_or(ApiError::AuthenticationRequired)
}

pub fn activated_user(principal: &Principal) -> Result<&User, ApiError> {
    let user = authenticated_user(principal)?;
    if user.activated {
        Ok(user)
    } else {
        Err(ApiError::InactiveAccount)
    }
}

pub async fn require_authenticated_user(
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    authenticated_user(principal(&request)?)?;
    Ok(next.run(request).await)
}

pub async fn require_activated_user(
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    activated_user(principal(&request)?)?;
    Ok(next.run(request).await)
}

/// State for [`require_permission`]: which code to demand and where to look it up.
#[derive(Clone)]
pub struct PermissionGate {
    permissions: Arc<dyn PermissionStore>,
    code: &'static str,
    deadline: Duration,
}

impl PermissionGate {
    pub fn new(state: &AppState, code: &'static str) -> Self {
        Self {
            permissions: state.permissions.clone(),
            code,
            deadline: state.operation_timeout,
        }
    }
}

/// Admit only activated users holding `gate.code`.
///
/// A failed permission lookup denies the request; it is never read as a grant.
pub async fn require_permission(
    State(gate): State<PermissionGate>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = activated_user(principal(&request)?)?.id;

    let granted = match with_deadline(gate.deadline, gate.permissions.permissions_for_user(user_id)).await {
        Ok(permissions) => permissions.includes(gate.code),
        Err(err) => {
            tracing::error!(user_id, permission = gate.code, error = %err, "Permission lookup failed");
            false
        }
    };

    if !granted {
        tracing::debug!(user_id, permission = gate.code, "Permission denied");
        return Err(ApiError::NotPermitted);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::Permissions;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    struct FailingPermissions;

    #[async_trait]
    impl PermissionStore for FailingPermissions {
        async fn permissions_for_user(&self, _: i64) -> Result<Permissions, StoreError> {
            Err(StoreError::Timeout(Duration::from_secs(3)))
        }

        async fn grant(&self, _: i64, _: &[&str]) -> Result<(), StoreError> {
            Err(StoreError::Timeout(Duration::from_secs(3)))
        }
    }

    fn user(id: i64, activated: bool) -> Principal {
        Principal::user(User {
            id,
            created_at: Utc::now(),
            name: "Test User".into(),
            email: "test@example.com".into(),
            activated,
            version: 1,
        })
    }

    fn request(principal: Option<Principal>) -> Request<Body> {
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        if let Some(p) = principal {
            req.extensions_mut().insert(p);
        }
        req
    }

    async fn status(router: Router, principal: Option<Principal>) -> StatusCode {
        router.oneshot(request(principal)).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_require_authenticated() {
        let router = || {
            Router::new()
                .route("/", get(|| async { "ok" }))
                .layer(middleware::from_fn(require_authenticated_user))
        };
        assert_eq!(status(router(), Some(Principal::Anonymous)).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(router(), Some(user(1, false))).await, StatusCode::OK);
        assert_eq!(status(router(), None).await, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_require_activated() {
        let router = || {
            Router::new()
                .route("/", get(|| async { "ok" }))
                .layer(middleware::from_fn(require_activated_user))
        };
        assert_eq!(status(router(), Some(Principal::Anonymous)).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(router(), Some(user(1, false))).await, StatusCode::FORBIDDEN);
        assert_eq!(status(router(), Some(user(1, true))).await, StatusCode::OK);
    }

    fn gated(gate: PermissionGate, called: Arc<AtomicBool>) -> Router {
        Router::new()
            .route(
                "/",
                get(move || {
                    let called = called.clone();
                    async move {
                        called.store(true, Ordering::SeqCst);
                        "ok"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(gate, require_permission))
    }

    #[tokio::test]
    async fn test_missing_permission_never_reaches_handler() {
        let store = Arc::new(MemoryStore::new());
        store.add_permissions_for_user(1, ["bar"]);
        let state = AppState::with_store(AppConfig::default(), store);

        let called = Arc::new(AtomicBool::new(false));
        let router = gated(PermissionGate::new(&state, "foo"), called.clone());
        assert_eq!(status(router, Some(user(1, true))).await, StatusCode::FORBIDDEN);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_permission_granted() {
        let store = Arc::new(MemoryStore::new());
        store.add_permissions_for_user(1, ["foo"]);
        let state = AppState::with_store(AppConfig::default(), store);

        let called = Arc::new(AtomicBool::new(false));
        let router = gated(PermissionGate::new(&state, "foo"), called.clone());
        assert_eq!(status(router, Some(user(1, true))).await, StatusCode::OK);
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_permission_implies_activation() {
        let store = Arc::new(MemoryStore::new());
        store.add_permissions_for_user(1, ["foo"]);
        let state = AppState::with_store(AppConfig::default(), store);

        let called = Arc::new(AtomicBool::new(false));
        let router = gated(PermissionGate::new(&state, "foo"), called.clone());
        assert_eq!(status(router.clone(), Some(user(1, false))).await, StatusCode::FORBIDDEN);
        assert_eq!(status(router, Some(Principal::Anonymous)).await, StatusCode::UNAUTHORIZED);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_closed() {
        let mut state = AppState::with_store(AppConfig::default(), Arc::new(MemoryStore::new()));
        state.permissions = Arc::new(FailingPermissions);

        let called = Arc::new(AtomicBool::new(false));
        let router = gated(PermissionGate::new(&state, "foo"), called.clone());
        assert_eq!(status(router, Some(user(1, true))).await, StatusCode::FORBIDDEN);
        assert!(!called.load(Ordering::SeqCst));
    }
}
