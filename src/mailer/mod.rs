//! Outbound notifications.
//!
//! # Data Flow
//! ```text
//! POST /v1/users
//!     → activation token issued
//!     → Mailer::send_activation (user, plaintext token)
//!     → delivery failure is logged; the registration still stands
//! ```
//!
//! Delivery itself is outside this crate. [`LogMailer`] stands in for it
//! and writes the message to the log instead.

use async_trait::async_trait;

use crate::models::{Token, User};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send `user` the activation token they need for `POST /v1/users/activate`.
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), MailError>;
}

/// Writes activation messages to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), MailError> {
        tracing::info!(
            user_id = user.id,
            email = %user.email,
            expiry = %token.expiry,
            "Activation token issued"
        );
        tracing::debug!(user_id = user.id, token = %token.plaintext, "Activation token plaintext");
        Ok(())
    }
}
