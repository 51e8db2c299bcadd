//! In-memory collaborators for testing and embedding.
//!
//! Nothing here is persisted. Useful for tests and for running the engine without a
//! database.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CheckpointStore, EventCounter, SubjectSource};
use crate::error::{Result, TallyError};
use crate::types::{
    Category, Checkpoint, EventRecord, SubjectContext, SubjectKey, SubjectKind, TimeWindow,
};

/// Append-only event log held in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<EventRecord>>,
}

impl InMemoryEventLog {
    /// Create a new, empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub async fn append(&self, event: EventRecord) {
        self.events.write().await.push(event);
    }

    /// Append several events at once.
    pub async fn append_batch(&self, events: impl IntoIterator<Item = EventRecord>) {
        self.events.write().await.extend(events);
    }

    /// Get the number of events in the log.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Check if the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl EventCounter for InMemoryEventLog {
    async fn sum_window(
        &self,
        subject: &SubjectKey,
        category: &Category,
        window: TimeWindow,
    ) -> Result<u64> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| &e.subject == subject && &e.category == category)
            .filter(|e| window.contains(e.created_at))
            .fold(0u64, |total, e| total.saturating_add(e.counts_for)))
    }
}

/// Checkpoints held in a map behind a single lock.
///
/// Each commit replaces the whole value under the write lock, so readers only ever observe
/// complete checkpoints.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<SubjectKey, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored checkpoint without the empty-default fallback.
    pub async fn get(&self, subject: &SubjectKey) -> Option<Checkpoint> {
        self.checkpoints.read().await.get(subject).cloned()
    }

    /// Number of subjects with a stored checkpoint.
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn read(&self, subject: &SubjectKey) -> Result<Checkpoint> {
        Ok(self
            .get(subject)
            .await
            .unwrap_or_else(|| Checkpoint::empty(subject.clone())))
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        if let Some(stored) = checkpoints.get(&checkpoint.subject)
            && stored.last_tabulated_at > checkpoint.last_tabulated_at
        {
            return Err(TallyError::Conflict(format!(
                "checkpoint for {} already tabulated at {:?}",
                checkpoint.subject, stored.last_tabulated_at
            )));
        }
        checkpoints.insert(checkpoint.subject.clone(), checkpoint.clone());
        Ok(())
    }
}

/// Subject directory held in memory.
#[derive(Debug, Default)]
pub struct InMemorySubjects {
    subjects: RwLock<BTreeMap<SubjectKey, SubjectContext>>,
}

impl InMemorySubjects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a subject.
    pub async fn insert(&self, subject: SubjectContext) {
        self.subjects
            .write()
            .await
            .insert(subject.key.clone(), subject);
    }

    /// Update the denormalized magnitude of an existing subject.
    pub async fn set_magnitude(&self, key: &SubjectKey, magnitude: u64) -> Result<()> {
        let mut subjects = self.subjects.write().await;
        let subject = subjects
            .get_mut(key)
            .ok_or_else(|| TallyError::MalformedSubject(format!("subject not found: {key}")))?;
        subject.magnitude = magnitude;
        Ok(())
    }

    pub async fn remove(&self, key: &SubjectKey) -> Option<SubjectContext> {
        self.subjects.write().await.remove(key)
    }
}

#[async_trait]
impl SubjectSource for InMemorySubjects {
    async fn load(&self, subject: &SubjectKey) -> Result<Option<SubjectContext>> {
        Ok(self.subjects.read().await.get(subject).cloned())
    }

    async fn list(&self, kind: SubjectKind) -> Result<Vec<SubjectKey>> {
        Ok(self
            .subjects
            .read()
            .await
            .keys()
            .filter(|key| key.kind == kind)
            .cloned()
            .collect())
    }
}
