//! One incremental tabulation pass per subject.
//!
//! ## Pass Flow
//!
//! ```text
//! run(subject)
//!   Idle ──▶ Sampling ──▶ Skipped                      (gate said no: nothing written)
//!               │  └─ SamplingGate::should_run(max(subject magnitude, tabulated magnitude))
//!               │
//!               └──▶ Counting ──▶ Computing ──▶ Committing ──▶ Idle
//!                      │             │              │
//!                      │             │              └─ CheckpointStore::commit (atomic)
//!                      │             └─ MetricFormula::compute on cumulative counts
//!                      └─ EventCounter::sum_window over (last_tabulated_at, now]
//! ```
//!
//! Each pass only reads the delta since the previous checkpoint and adds it onto the stored
//! totals, so its cost depends on the number of tracked categories rather than on the size of
//! the event log. A failure anywhere leaves the stored checkpoint as it was; because
//! `last_tabulated_at` did not advance, a retry re-derives the same delta range. Retrying is
//! the caller's job.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info_span, trace};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::context::{ExecutionContext, TabulationContext};
use crate::error::{Result, TallyError};
use crate::formula::MetricFormula;
use crate::sampling::{AlwaysRun, SamplingDecision, SamplingGate};
use crate::store::{CheckpointStore, EventCounter, SubjectSource};
use crate::types::{Checkpoint, SubjectContext, SubjectKey, TimeWindow};

/// Stage of a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Idle,
    Sampling,
    Skipped,
    Counting,
    Computing,
    Committing,
}

impl PassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sampling => "sampling",
            Self::Skipped => "skipped",
            Self::Counting => "counting",
            Self::Computing => "computing",
            Self::Committing => "committing",
        }
    }
}

impl std::fmt::Display for PassState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported status of a finished pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Committed,
    Skipped,
}

/// Result of [`IncrementalAggregator::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A new checkpoint was stored.
    Committed(Checkpoint),
    /// The sampling gate shed this pass; nothing was written.
    Skipped(SamplingDecision),
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Committed(_) => RunStatus::Committed,
            Self::Skipped(_) => RunStatus::Skipped,
        }
    }

    /// Derived metric of the committed checkpoint.
    pub fn derived_metric(&self) -> Option<f64> {
        match self {
            Self::Committed(checkpoint) => Some(checkpoint.derived_metric),
            Self::Skipped(_) => None,
        }
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            Self::Committed(checkpoint) => Some(checkpoint),
            Self::Skipped(_) => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Orchestrates tabulation passes for one formula.
///
/// Holds no per-subject state; all of it lives in the checkpoint store. Safe to share across
/// tasks and to run concurrently, including for the same subject.
pub struct IncrementalAggregator {
    subjects: Arc<dyn SubjectSource>,
    counter: Arc<dyn EventCounter>,
    checkpoints: Arc<dyn CheckpointStore>,
    formula: Arc<dyn MetricFormula>,
    gate: Arc<dyn SamplingGate>,
    clock: Arc<dyn Clock>,
    execution: ExecutionContext,
}

impl IncrementalAggregator {
    /// Create an aggregator that never sheds load, uses wall-clock time and a default
    /// (development) execution context.
    pub fn new(
        subjects: Arc<dyn SubjectSource>,
        counter: Arc<dyn EventCounter>,
        checkpoints: Arc<dyn CheckpointStore>,
        formula: Arc<dyn MetricFormula>,
    ) -> Self {
        Self {
            subjects,
            counter,
            checkpoints,
            formula,
            gate: Arc::new(AlwaysRun),
            clock: Arc::new(SystemClock),
            execution: ExecutionContext::default(),
        }
    }

    /// Use a sampling gate.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn SamplingGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Use a time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use an execution context.
    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }

    pub fn subjects(&self) -> &dyn SubjectSource {
        self.subjects.as_ref()
    }

    pub fn formula(&self) -> &dyn MetricFormula {
        self.formula.as_ref()
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    /// Load seen by the sampling gate: the subject's denormalized counter or the tabulated
    /// total of the formula's magnitude category, whichever is larger.
    fn magnitude(&self, subject: &SubjectContext, previous: &Checkpoint) -> u64 {
        let tabulated = self
            .formula
            .magnitude_category()
            .map_or(0, |category| previous.cumulative_counts.get(category));
        subject.magnitude.max(tabulated)
    }

    /// Run one pass for `subject`.
    ///
    /// Errors propagate untouched. `StorageUnavailable` before the commit means nothing was
    /// written; `Conflict` from the commit means the pass was abandoned whole.
    pub async fn run(&self, subject: &SubjectKey) -> Result<RunOutcome> {
        let pass_id = Uuid::now_v7();
        let span = info_span!(
            "tabulation_pass",
            %pass_id,
            %subject,
            formula = self.formula.name()
        );
        self.run_pass(subject).instrument(span).await
    }

    async fn run_pass(&self, key: &SubjectKey) -> Result<RunOutcome> {
        let mut state = PassState::Idle;

        transition(&mut state, PassState::Sampling);
        let subject = self
            .subjects
            .load(key)
            .await?
            .ok_or_else(|| TallyError::MalformedSubject(format!("subject not found: {key}")))?;
        let previous = self.checkpoints.read(key).await?;
        let magnitude = self.magnitude(&subject, &previous);
        let decision = self.gate.should_run(key, magnitude);
        if decision.is_skip() {
            transition(&mut state, PassState::Skipped);
            debug!(magnitude, %decision, "pass skipped");
            return Ok(RunOutcome::Skipped(decision));
        }

        transition(&mut state, PassState::Counting);
        let now = pass_time(self.clock.now(), previous.last_tabulated_at);
        let window = TimeWindow::between(previous.last_tabulated_at, now);
        let mut counts = previous.cumulative_counts.clone();
        let mut counted = BTreeSet::new();
        for category in self.formula.categories() {
            if !counted.insert(category) {
                continue;
            }
            let delta = self.counter.sum_window(key, category, window).await?;
            trace!(%category, delta, "counted delta");
            counts.add(category.clone(), delta);
        }

        transition(&mut state, PassState::Computing);
        let ctx = TabulationContext::new(&subject, &self.execution, now);
        let derived_metric = self.formula.compute(&counts, &ctx)?;
        if !derived_metric.is_finite() {
            return Err(TallyError::InvalidMetric(format!(
                "{} produced {derived_metric} for {key}",
                self.formula.name()
            )));
        }

        transition(&mut state, PassState::Committing);
        let checkpoint = Checkpoint {
            subject: key.clone(),
            last_tabulated_at: Some(now),
            cumulative_counts: counts,
            derived_metric,
        };
        self.checkpoints.commit(&checkpoint).await?;

        transition(&mut state, PassState::Idle);
        debug!(
            derived_metric,
            previous_metric = previous.derived_metric,
            "checkpoint committed"
        );
        Ok(RunOutcome::Committed(checkpoint))
    }
}

impl std::fmt::Debug for IncrementalAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalAggregator")
            .field("formula", &self.formula.name())
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

fn transition(state: &mut PassState, next: PassState) {
    trace!(from = %state, to = %next, "pass state");
    *state = next;
}

/// Tabulation time for a pass, at microsecond precision; never earlier than the previous
/// checkpoint.
fn pass_time(now: DateTime<Utc>, last_tabulated_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    match last_tabulated_at {
        Some(last) if last > now => last,
        _ => now,
    }
}
