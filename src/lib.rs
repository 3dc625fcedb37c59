//! Gatekeeper: an HTTP request pipeline guarding a small movie API.
//!
//! Every request passes panic containment, metrics, CORS, per-client rate
//! limiting and bearer-token authentication before per-route authorization
//! gates decide whether the handler runs. Updates are guarded by optimistic
//! concurrency control.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mailer;
pub mod models;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod store;

pub use config::AppConfig;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
