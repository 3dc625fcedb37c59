//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (answer trusted preflights, annotate responses)
//!     → rate_limit.rs (per-IP token bucket)
//!     → auth.rs (bearer token → Principal in request extensions)
//!     → access_control.rs (per-route gates: authenticated, activated, permission)
//!     → Handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: a gate that cannot decide denies
//! - Every response carries the `Vary` headers its gates depend on
//! - No trust in client input: tokens are compared by fingerprint only

pub mod access_control;
pub mod auth;
pub mod cors;
pub mod password;
pub mod rate_limit;
