//! Pure formulas mapping cumulative counts to a derived metric.
//!
//! A formula names the categories it needs, and the aggregator keeps exactly those
//! categories up to date in the checkpoint before calling [`MetricFormula::compute`].
//! Formulas must return a finite number for every input, including all-zero counts.

mod engagement;
mod success_rate;

pub use engagement::{EngagementScore, body_bonus, recency_bonus};
pub use success_rate::SuccessRate;

use crate::context::TabulationContext;
use crate::error::Result;
use crate::types::{Category, CategoryCounts};

/// A derived-metric strategy, pluggable per subject kind.
pub trait MetricFormula: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Categories whose cumulative totals this formula reads.
    fn categories(&self) -> &[Category];

    /// Category whose cumulative total says how busy a subject is. The sampling gate sees the
    /// larger of this total and the subject's denormalized `magnitude`.
    fn magnitude_category(&self) -> Option<&Category> {
        None
    }

    /// Compute the metric. Deterministic given its inputs.
    fn compute(&self, counts: &CategoryCounts, ctx: &TabulationContext<'_>) -> Result<f64>;
}

/// `numerator / denominator`, or 0 when the denominator is 0.
pub fn guarded_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
