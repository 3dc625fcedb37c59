//! Optimistic concurrency for versioned resources.
//!
//! # Protocol
//! ```text
//! fetch(id)                      → resource at version V
//! mutate(&mut copy)              → apply changes, validate
//! update_if_version(copy @ V)    → atomic "WHERE id = ? AND version = V"
//!     matched   → stored version V + 1, returned to the caller
//!     unmatched → EditConflict: another writer committed first
//! ```
//!
//! No lock is held between the read and the write. Correctness rests on the
//! store applying the conditional write atomically. A conflict is surfaced,
//! never retried here.

use std::time::Duration;

use async_trait::async_trait;

use crate::resilience::timeouts::with_deadline;
use crate::store::StoreError;

/// A stored entity carrying a version stamp.
///
/// The version starts at 1 on creation and grows by exactly 1 per update.
pub trait VersionedResource: Clone + Send + Sync {
    fn id(&self) -> i64;
    fn version(&self) -> i32;
    fn set_version(&mut self, version: i32);
}

#[async_trait]
pub trait VersionedStore<R: VersionedResource>: Send + Sync {
    async fn fetch(&self, id: i64) -> Result<R, StoreError>;

    /// Replace the stored resource if its version still equals `resource.version()`.
    ///
    /// Returns the new version, or [`StoreError::EditConflict`] when the stored
    /// version moved on or the record has gone.
    async fn update_if_version(&self, resource: &R) -> Result<i32, StoreError>;
}

/// Read-modify-write `id` under optimistic concurrency control.
///
/// `expected_version`, when given, must match the version read, otherwise
/// the update is rejected as a conflict before `mutate` runs. `mutate`
/// applies the caller's changes and validates the result; its error aborts
/// the update. Each storage call is bounded by `deadline`.
pub async fn update_versioned<R, S, E, F>(
    store: &S,
    id: i64,
    expected_version: Option<i32>,
    deadline: Duration,
    mutate: F,
) -> Result<R, E>
where
    R: VersionedResource,
    S: VersionedStore<R> + ?Sized,
    E: From<StoreError>,
    F: FnOnce(&mut R) -> Result<(), E>,
{
    let mut resource = with_deadline(deadline, store.fetch(id)).await?;
    let read_version = resource.version();

    if let Some(expected) = expected_version {
        if expected != read_version {
            tracing::debug!(id, expected, stored = read_version, "Expected version is stale");
            return Err(StoreError::EditConflict.into());
        }
    }

    mutate(&mut resource)?;
    // The mutation must not move the stamp the write is conditioned on.
    resource.set_version(read_version);

    let new_version = with_deadline(deadline, store.update_if_version(&resource)).await?;
    debug_assert_eq!(new_version, read_version + 1);
    resource.set_version(new_version);

    tracing::debug!(id, version = new_version, "Versioned update committed");
    Ok(resource)
}
