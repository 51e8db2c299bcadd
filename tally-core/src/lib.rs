//! tally-core - Incremental metric aggregation
//!
//! Keeps derived metrics (billboard success rates, comment and article engagement scores, tag
//! trends) up to date without rescanning the event log. Each subject carries a checkpoint of
//! cumulative per-category totals; a pass sums only the events recorded since that checkpoint,
//! recomputes the metric and commits the new checkpoint atomically.
//!
//! Storage is always injected: see [`store`] for the collaborator traits and in-memory
//! implementations.

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod formula;
pub mod recount;
pub mod sampling;
pub mod store;
pub mod trend;
pub mod types;

pub use aggregator::{IncrementalAggregator, PassState, RunOutcome, RunStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    EngagementConfig, RecencyTier, SamplingConfig, SuccessRateConfig, TallyConfig, TrendConfig,
};
pub use context::{Classifier, ClassifierError, Environment, ExecutionContext, TabulationContext};
pub use error::{Result, TallyError};
pub use formula::{EngagementScore, MetricFormula, SuccessRate};
pub use recount::{RecountSummary, Recounter};
pub use sampling::{AlwaysRun, SamplingDecision, SamplingGate, TieredSamplingGate};
pub use store::{
    CheckpointStore, EventCounter, InMemoryCheckpointStore, InMemoryEventLog, InMemorySubjects,
    SubjectSource,
};
pub use trend::{TrendMetric, TrendReport, TrendTabulator};
pub use types::*;
