//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Handler or middleware calling a store:
//!     → timeouts.rs (enforce a per-operation deadline)
//!     → On expiry: StoreError::Timeout, surfaced as 500
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every storage call has a deadline
//! - Nothing here retries. A failed write is reported, never replayed;
//!   an edit conflict is left for the client to re-read and resubmit

pub mod timeouts;
