//! Collaborator traits for the storage the engine reads and writes.
//!
//! The engine never owns storage. It is handed:
//! - [`EventCounter`] - read-only sums over the append-only event log
//! - [`CheckpointStore`] - per-subject tabulation state with atomic commits
//! - [`SubjectSource`] - denormalized subject fields and subject listings
//!
//! [`memory`] holds in-process implementations of all three.

pub mod memory;

pub use memory::{InMemoryCheckpointStore, InMemoryEventLog, InMemorySubjects};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Category, Checkpoint, SubjectContext, SubjectKey, SubjectKind, TimeWindow};

/// Aggregate sums over the event log.
///
/// Sums are monotonic: widening a window never returns less. No matching events is a
/// valid zero, not an error. Unreachable storage is `StorageUnavailable`.
#[async_trait]
pub trait EventCounter: Send + Sync {
    /// Sum of `counts_for` over events of `category` for `subject` inside `window`.
    async fn sum_window(
        &self,
        subject: &SubjectKey,
        category: &Category,
        window: TimeWindow,
    ) -> Result<u64>;

    /// Sum over events strictly after `since`, or all-time when `since` is `None`.
    async fn sum(
        &self,
        subject: &SubjectKey,
        category: &Category,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        self.sum_window(subject, category, TimeWindow::since(since))
            .await
    }
}

/// Per-subject checkpoint storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored checkpoint, or [`Checkpoint::empty`] when the subject was never tabulated.
    async fn read(&self, subject: &SubjectKey) -> Result<Checkpoint>;

    /// Atomically replace or create the checkpoint for `checkpoint.subject`.
    ///
    /// Concurrent commits never interleave: afterwards the stored value equals exactly one
    /// committed checkpoint. A checkpoint whose `last_tabulated_at` is older than the stored
    /// one is rejected with `Conflict` so tabulation time never moves backwards.
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Read access to the subjects being scored.
#[async_trait]
pub trait SubjectSource: Send + Sync {
    /// Denormalized fields for a subject, `None` if it does not exist.
    async fn load(&self, subject: &SubjectKey) -> Result<Option<SubjectContext>>;

    /// Every subject of a kind.
    async fn list(&self, kind: SubjectKind) -> Result<Vec<SubjectKey>>;
}
