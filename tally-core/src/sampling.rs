//! Load shedding for hot subjects.
//!
//! A subject whose metric barely moves per additional event does not need a fresh pass on
//! every trigger. The gate decides, per invocation, whether a pass runs at all:
//!
//! | Magnitude | Probability |
//! |-----------|-------------|
//! | `<= low_threshold` | 1 (always) |
//! | `<= high_threshold` | `mid_probability` |
//! | `> high_threshold` | `high_probability` |
//!
//! Skipping is never a correctness concern: a skipped pass leaves the checkpoint untouched and
//! the next pass picks up the whole delta. Every call rolls independently.

use std::sync::Mutex;

use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::SamplingConfig;
use crate::types::SubjectKey;

/// Outcome of a sampling roll. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingDecision {
    /// Whether the pass should run.
    pub run: bool,
    /// Probability the roll was made with.
    pub probability: f64,
}

impl SamplingDecision {
    /// A decision that runs unconditionally.
    pub fn always() -> Self {
        Self {
            run: true,
            probability: 1.0,
        }
    }

    pub fn is_skip(&self) -> bool {
        !self.run
    }
}

impl std::fmt::Display for SamplingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verb = if self.run { "run" } else { "skip" };
        write!(f, "{verb} (p={})", self.probability)
    }
}

/// Decides whether a pass for a subject of a given magnitude runs.
pub trait SamplingGate: Send + Sync {
    fn should_run(&self, subject: &SubjectKey, magnitude: u64) -> SamplingDecision;
}

/// Gate that never sheds load, for scheduled recounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRun;

impl SamplingGate for AlwaysRun {
    fn should_run(&self, _subject: &SubjectKey, _magnitude: u64) -> SamplingDecision {
        SamplingDecision::always()
    }
}

/// Two-tier probabilistic gate with an injectable randomness source.
pub struct TieredSamplingGate<R = StdRng> {
    config: SamplingConfig,
    rng: Mutex<R>,
}

impl TieredSamplingGate<StdRng> {
    /// Create a gate seeded from OS entropy.
    pub fn new(config: SamplingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a gate with a specific seed (for testing).
    pub fn with_seed(config: SamplingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> TieredSamplingGate<R> {
    /// Create a gate drawing from the given generator.
    pub fn with_rng(config: SamplingConfig, rng: R) -> Self {
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Run probability for a magnitude under the configured tiers.
    pub fn probability_for(&self, magnitude: u64) -> f64 {
        if magnitude <= self.config.low_threshold {
            1.0
        } else if magnitude <= self.config.high_threshold {
            self.config.mid_probability
        } else {
            self.config.high_probability
        }
    }

    fn roll(&self, probability: f64) -> bool {
        if probability >= 1.0 {
            return true;
        }
        if probability <= 0.0 {
            return false;
        }
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.r#gen::<f64>() < probability
    }
}

impl<R: RngCore + Send> SamplingGate for TieredSamplingGate<R> {
    fn should_run(&self, subject: &SubjectKey, magnitude: u64) -> SamplingDecision {
        let probability = self.probability_for(magnitude);
        let run = self.roll(probability);
        tracing::trace!(%subject, magnitude, probability, run, "sampling roll");
        SamplingDecision { run, probability }
    }
}

impl Default for TieredSamplingGate<StdRng> {
    fn default() -> Self {
        Self::new(SamplingConfig::default())
    }
}

impl<R> std::fmt::Debug for TieredSamplingGate<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredSamplingGate")
            .field("low_threshold", &self.config.low_threshold)
            .field("mid_probability", &self.config.mid_probability)
            .field("high_threshold", &self.config.high_threshold)
            .field("high_probability", &self.config.high_probability)
            .finish()
    }
}
