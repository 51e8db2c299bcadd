//! Bounded-concurrency recounts over many subjects.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::aggregator::{IncrementalAggregator, RunOutcome};
use crate::error::{Result, TallyError};
use crate::types::{SubjectKey, SubjectKind};

/// Default number of passes in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// What a recount did.
#[derive(Debug, Default, Serialize)]
pub struct RecountSummary {
    pub committed: usize,
    pub skipped: usize,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Vec<(SubjectKey, TallyError)>,
}

impl RecountSummary {
    /// Number of subjects a pass was attempted for.
    pub fn total(&self) -> usize {
        self.committed + self.skipped + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures worth scheduling again.
    pub fn retryable(&self) -> impl Iterator<Item = &SubjectKey> {
        self.failures
            .iter()
            .filter(|(_, err)| err.is_retryable())
            .map(|(key, _)| key)
    }

    fn record(&mut self, subject: SubjectKey, result: Result<RunOutcome>) {
        match result {
            Ok(RunOutcome::Committed(_)) => self.committed += 1,
            Ok(RunOutcome::Skipped(_)) => self.skipped += 1,
            Err(err) => {
                warn!(%subject, error = %err, "pass failed");
                self.failures.push((subject, err));
            }
        }
    }
}

fn serialize_failures<S>(
    failures: &[(SubjectKey, TallyError)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(failures.len()))?;
    for (subject, err) in failures {
        map.serialize_entry(&subject.to_string(), &err.to_string())?;
    }
    map.end()
}

/// Runs an aggregator over many subjects, a bounded number at a time.
///
/// One subject failing never stops the others.
#[derive(Debug, Clone)]
pub struct Recounter {
    aggregator: Arc<IncrementalAggregator>,
    concurrency: usize,
}

impl Recounter {
    pub fn new(aggregator: Arc<IncrementalAggregator>) -> Self {
        Self {
            aggregator,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Limit the number of passes in flight. Zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run one pass for every subject in `subjects`.
    pub async fn recount(&self, subjects: Vec<SubjectKey>) -> RecountSummary {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();

        for subject in subjects {
            let aggregator = self.aggregator.clone();
            let semaphore = semaphore.clone();
            let key = subject.clone();
            let handle = tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => aggregator.run(&key).await,
                    Err(_) => Err(TallyError::Config("recount semaphore closed".into())),
                };
                (key, result)
            });
            in_flight.insert(handle.id(), subject);
        }

        let mut summary = RecountSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((subject, result)) => summary.record(subject, result),
                Err(join_err) => {
                    let Some(subject) = in_flight.remove(&join_err.id()) else {
                        warn!(error = %join_err, "recount task lost");
                        continue;
                    };
                    summary.record(subject, Err(TallyError::Io(join_err.into())));
                }
            }
        }

        debug!(
            committed = summary.committed,
            skipped = summary.skipped,
            failed = summary.failures.len(),
            "recount finished"
        );
        summary
    }

    /// Recount every subject of `kind` known to the aggregator's subject source.
    pub async fn recount_kind(&self, kind: SubjectKind) -> Result<RecountSummary> {
        let subjects = self.aggregator.subjects().list(kind).await?;
        info!(
            %kind,
            subjects = subjects.len(),
            formula = self.aggregator.formula().name(),
            "recounting"
        );
        Ok(self.recount(subjects).await)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::formula::SuccessRate;
    use crate::store::{InMemoryCheckpointStore, InMemoryEventLog, InMemorySubjects};
    use crate::types::{Category, EventRecord, SubjectContext};

    async fn recounter(ids: &[&str]) -> (Recounter, Arc<InMemoryEventLog>) {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let subjects = Arc::new(InMemorySubjects::new());
        for id in ids {
            subjects
                .insert(SubjectContext::new(SubjectKey::billboard(*id), created))
                .await;
        }
        let log = Arc::new(InMemoryEventLog::new());
        let aggregator = IncrementalAggregator::new(
            subjects,
            log.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(SuccessRate::default()),
        );
        (Recounter::new(Arc::new(aggregator)), log)
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_others() {
        let (recounter, _) = recounter(&["1", "2"]).await;
        let summary = recounter
            .recount(vec![
                SubjectKey::billboard("1"),
                SubjectKey::billboard("missing"),
                SubjectKey::billboard("2"),
            ])
            .await;

        assert_eq!(summary.committed, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, SubjectKey::billboard("missing"));
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_clean());
        assert_eq!(summary.retryable().count(), 0);
    }

    #[tokio::test]
    async fn test_recount_kind_lists_subjects() {
        let (recounter, log) = recounter(&["1", "2", "3"]).await;
        log.append(
            EventRecord::new(
                SubjectKey::billboard("1"),
                Category::IMPRESSION,
                Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            ),
        )
        .await;

        let summary = recounter
            .clone()
            .with_concurrency(2)
            .recount_kind(SubjectKind::Billboard)
            .await
            .unwrap();
        assert_eq!(summary.committed, 3);
        assert!(summary.is_clean());

        let empty = recounter.recount_kind(SubjectKind::Tag).await.unwrap();
        assert_eq!(empty.total(), 0);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let aggregator = IncrementalAggregator::new(
            Arc::new(InMemorySubjects::new()),
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(SuccessRate::default()),
        );
        let recounter = Recounter::new(Arc::new(aggregator)).with_concurrency(0);
        assert_eq!(recounter.concurrency(), 1);
    }

    #[test]
    fn test_summary_serializes_failures_as_map() {
        let summary = RecountSummary {
            committed: 1,
            skipped: 0,
            failures: vec![(
                SubjectKey::comment("9"),
                TallyError::StorageUnavailable("down".into()),
            )],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["committed"], 1);
        assert_eq!(json["failures"]["comment:9"], "Storage unavailable: down");
    }
}
