//! Storage collaborators.
//!
//! # Data Flow
//! ```text
//! authenticator ──▶ CredentialStore::user_for_token
//! authorizer    ──▶ PermissionStore::permissions_for_user
//! account flows ──▶ UserStore (register/by_email/activate)
//!               ──▶ CredentialStore::save_token, PermissionStore::grant
//! handlers      ──▶ MovieRepository (insert/get/delete)
//!               ──▶ optimistic::update_versioned ──▶ VersionedStore::update_if_version
//! ```
//!
//! # Design Decisions
//! - Every lookup result is a `StoreError` variant, never a sentinel value:
//!   callers match on `NotFound` vs everything else
//! - Every call made on behalf of a request is bounded by a deadline
//!   (`resilience::timeouts::with_deadline`)
//! - `memory.rs` is the only backend; the traits are the seam for a real one

use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Fingerprint, Movie, Permissions, Scope, Token, User, UserCredentials};

pub mod memory;
pub mod optimistic;

pub use memory::MemoryStore;
pub use optimistic::{update_versioned, VersionedResource, VersionedStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("duplicate email")]
    DuplicateEmail,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Resolves bearer tokens to their owners.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up the user owning a non-expired token of `scope` with this fingerprint.
    async fn user_for_token(
        &self,
        scope: Scope,
        fingerprint: &Fingerprint,
    ) -> Result<User, StoreError>;

    /// Persist an issued token. Only its fingerprint is kept.
    async fn save_token(&self, token: &Token) -> Result<(), StoreError>;

    /// Revoke every token of `scope` held by `user_id`. Returns how many were removed.
    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> Result<usize, StoreError>;
}

/// Loads the permission codes granted to a user.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError>;

    async fn grant(&self, user_id: i64, codes: &[&str]) -> Result<(), StoreError>;
}

/// User accounts. Emails are unique, compared case-insensitively.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Store a new user, returning it with its assigned id and version 1.
    /// An email already in use is [`StoreError::DuplicateEmail`].
    async fn register(&self, user: User, password_hash: String) -> Result<User, StoreError>;

    async fn by_email(&self, email: &str) -> Result<UserCredentials, StoreError>;

    /// Mark the user activated, returning the updated record.
    async fn activate(&self, user_id: i64) -> Result<User, StoreError>;
}

/// Movie persistence. Updates go through [`VersionedStore`].
#[async_trait]
pub trait MovieRepository: VersionedStore<Movie> {
    /// Store a new movie, returning it with its assigned id and version 1.
    async fn insert(&self, movie: Movie) -> Result<Movie, StoreError>;

    async fn get(&self, id: i64) -> Result<Movie, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}
