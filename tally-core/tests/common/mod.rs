//! Shared fixtures for tally-core integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tally_core::{
    Category, Checkpoint, CheckpointStore, EventCounter, EventRecord, InMemoryCheckpointStore,
    InMemoryEventLog, InMemorySubjects, IncrementalAggregator, ManualClock, MetricFormula, Result,
    SubjectContext, SubjectKey, SuccessRate, TallyError, TimeWindow,
};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    epoch() + Duration::minutes(minutes)
}

/// Checkpoint store whose commits can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyCheckpointStore {
    pub inner: InMemoryCheckpointStore,
    pub fail_commits: AtomicBool,
    pub commits: AtomicUsize,
}

impl FlakyCheckpointStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_commits.store(failing, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for FlakyCheckpointStore {
    async fn read(&self, subject: &SubjectKey) -> Result<Checkpoint> {
        self.inner.read(subject).await
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(TallyError::Conflict("write rejected".into()));
        }
        self.inner.commit(checkpoint).await
    }
}

/// Event counter that can be taken offline.
#[derive(Debug, Default)]
pub struct SwitchableCounter {
    pub log: InMemoryEventLog,
    pub down: AtomicBool,
}

impl SwitchableCounter {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventCounter for SwitchableCounter {
    async fn sum_window(
        &self,
        subject: &SubjectKey,
        category: &Category,
        window: TimeWindow,
    ) -> Result<u64> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TallyError::StorageUnavailable("event store offline".into()));
        }
        self.log.sum_window(subject, category, window).await
    }
}

/// A billboard setup with in-memory storage and a manual clock.
pub struct Harness {
    pub subjects: Arc<InMemorySubjects>,
    pub counter: Arc<SwitchableCounter>,
    pub checkpoints: Arc<FlakyCheckpointStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub async fn new(subjects: &[SubjectKey]) -> Self {
        let source = Arc::new(InMemorySubjects::new());
        for key in subjects {
            source
                .insert(SubjectContext::new(key.clone(), epoch()))
                .await;
        }
        Self {
            subjects: source,
            counter: Arc::new(SwitchableCounter::default()),
            checkpoints: Arc::new(FlakyCheckpointStore::default()),
            clock: Arc::new(ManualClock::new(epoch())),
        }
    }

    pub fn aggregator(&self) -> IncrementalAggregator {
        self.aggregator_with(Arc::new(SuccessRate::default()))
    }

    pub fn aggregator_with(&self, formula: Arc<dyn MetricFormula>) -> IncrementalAggregator {
        IncrementalAggregator::new(
            self.subjects.clone(),
            self.counter.clone(),
            self.checkpoints.clone(),
            formula,
        )
        .with_clock(self.clock.clone())
    }

    pub async fn record(
        &self,
        subject: &SubjectKey,
        category: &str,
        count: u64,
        at: DateTime<Utc>,
    ) {
        self.counter
            .log
            .append(EventRecord::new(subject.clone(), category, at).with_counts_for(count))
            .await;
    }

    pub async fn stored(&self, subject: &SubjectKey) -> Option<Checkpoint> {
        self.checkpoints.inner.get(subject).await
    }
}
