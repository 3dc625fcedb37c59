//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared [`AppState`] from config and storage backends
//! - Create the Axum Router with all handlers and their permission gates
//! - Wire up the request pipeline (panic containment, metrics, CORS,
//!   rate limiting, authentication)
//! - Serve on a listener until shutdown, with peer addresses recorded

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    handler::Handler,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::http::handlers::{account, debug, healthcheck, movies, users};
use crate::http::middleware::handle_panic;
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::mailer::{LogMailer, Mailer};
use crate::observability::metrics::{metrics_middleware, Metrics};
use crate::security::access_control::{
    require_activated_user, require_authenticated_user, require_permission, PermissionGate,
};
use crate::security::auth::authenticate;
use crate::security::cors::{enable_cors, CorsPolicy};
use crate::security::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::store::{CredentialStore, MemoryStore, MovieRepository, PermissionStore, UserStore};

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub credentials: Arc<dyn CredentialStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub users: Arc<dyn UserStore>,
    pub movies: Arc<dyn MovieRepository>,
    pub mailer: Arc<dyn Mailer>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub cors: Arc<CorsPolicy>,
    /// Deadline applied to every storage call made for a request.
    pub operation_timeout: Duration,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        credentials: Arc<dyn CredentialStore>,
        permissions: Arc<dyn PermissionStore>,
        users: Arc<dyn UserStore>,
        movies: Arc<dyn MovieRepository>,
    ) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(&config.limiter)),
            metrics: Arc::new(Metrics::new()),
            cors: Arc::new(CorsPolicy::new(config.cors.trusted_origins.iter().cloned())),
            operation_timeout: Duration::from_secs(config.timeouts.operation_secs),
            config: Arc::new(config),
            credentials,
            permissions,
            users,
            movies,
            mailer: Arc::new(LogMailer),
        }
    }

    /// State backed by a single in-process store for every collaborator.
    pub fn with_store(config: AppConfig, store: Arc<MemoryStore>) -> Self {
        Self::new(config, store.clone(), store.clone(), store.clone(), store)
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }
}

/// HTTP server for the API.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a server backed by a fresh in-process store.
    pub fn new(config: AppConfig) -> Self {
        Self::with_state(AppState::with_store(config, Arc::new(MemoryStore::new())))
    }

    pub fn with_state(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers run outermost first: request id, trace, panic containment,
    /// metrics, request timeout, CORS, rate limit, authentication. Permission
    /// gates wrap individual handlers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let gate = |code| middleware::from_fn_with_state(PermissionGate::new(&state, code), require_permission);

        let routes = Router::new()
            .route("/v1/healthcheck", get(healthcheck::healthcheck))
            .route(
                "/v1/movies",
                post(movies::create_movie.layer(gate("movies:write"))),
            )
            .route(
                "/v1/movies/{id}",
                get(movies::show_movie.layer(gate("movies:read")))
                    .patch(movies::update_movie.layer(gate("movies:write")))
                    .delete(movies::delete_movie.layer(gate("movies:write"))),
            )
            .route("/v1/users", post(users::register_user))
            .route("/v1/users/activate", post(users::activate_user))
            .route(
                "/v1/users/me",
                get(account::show_current_user.layer(middleware::from_fn(require_activated_user))),
            )
            .route(
                "/v1/tokens/authentication",
                post(account::create_authentication_token).delete(
                    account::revoke_authentication_tokens
                        .layer(middleware::from_fn(require_authenticated_user)),
                ),
            )
            .route("/debug/vars", get(debug::debug_vars.layer(gate("metrics:view"))));

        let request_timeout = Duration::from_secs(state.config.timeouts.request_secs);

        routes
            .layer(middleware::from_fn_with_state(state.clone(), authenticate))
            .layer(middleware::from_fn_with_state(state.limiter.clone(), rate_limit_middleware))
            .layer(middleware::from_fn_with_state(state.cors.clone(), enable_cors))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(middleware::from_fn_with_state(state.metrics.clone(), metrics_middleware))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
            .with_state(state)
    }

    /// The fully layered router, for driving the pipeline without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = self.state.config.environment.as_str(),
            rate_limit_enabled = self.state.limiter.enabled(),
            "HTTP server starting"
        );

        let sweeper = self.state.limiter.spawn_sweeper(shutdown.resubscribe());

        // The rate limiter keys on the peer address recorded here.
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal, draining connections");
            })
            .await?;

        if let Some(handle) = sweeper {
            let _ = handle.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
