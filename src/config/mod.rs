//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI overrides applied in main.rs
//!     → AppConfig (validated, immutable)
//!     → handed to HttpServer, which builds the pipeline state from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AppConfig, CorsConfig, Environment, LimiterConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, TimeoutConfig,
};
