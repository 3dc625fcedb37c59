//! Configuration validation.
//!
//! Serde handles syntax; this module checks values. All problems are
//! collected and returned together rather than stopping at the first.

use std::net::SocketAddr;

use axum::http::HeaderValue;

use crate::config::schema::AppConfig;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let limiter = &config.limiter;
    if !(limiter.requests_per_second.is_finite() && limiter.requests_per_second > 0.0) {
        errors.push(ValidationError::new(
            "limiter.requests_per_second",
            "must be a positive number",
        ));
    }
    if limiter.burst == 0 {
        errors.push(ValidationError::new("limiter.burst", "must be at least 1"));
    }
    if limiter.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "limiter.sweep_interval_secs",
            "must be greater than zero",
        ));
    }

    for origin in &config.cors.trusted_origins {
        if origin.is_empty() || HeaderValue::from_str(origin).is_err() {
            errors.push(ValidationError::new(
                "cors.trusted_origins",
                format!("'{origin}' is not a valid origin"),
            ));
        }
    }

    if config.timeouts.operation_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.operation_secs",
            "must be greater than zero",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.request_secs",
            "must be greater than zero",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address when metrics are enabled",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
