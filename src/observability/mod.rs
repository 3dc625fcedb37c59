//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (request/response counters)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → GET /debug/vars (JSON snapshot)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every log line via the trace span
//! - Metrics are cheap (atomic increments) and never touch the response

pub mod logging;
pub mod metrics;
