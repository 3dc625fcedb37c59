//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (peer address recorded)
//!     → request.rs (assign x-request-id)
//!     → middleware/recover.rs (panic containment)
//!     → observability + security layers
//!     → handlers/ (healthcheck, movies, account, debug)
//!     → error.rs (ApiError → JSON response)
//!     → Send to client
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod request;
pub mod server;

pub use error::ApiError;
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
