//! Explicit execution and per-pass context handed to formulas.
//!
//! Formulas never read ambient global state. Everything environment-dependent (production vs.
//! test behavior, feature flags, the spam classifier) arrives through an [`ExecutionContext`],
//! and everything subject-dependent through a [`TabulationContext`] built once per pass.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SubjectContext;

/// Deployment environment a pass runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    #[default]
    Development,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Failure reported by a [`Classifier`].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ClassifierError(pub String);

/// External content classifier scoring how spammy a subject is.
///
/// Scores are expected to be non-negative. Implementations backed by a remote service should
/// return an error on timeout or outage rather than a zero score.
pub trait Classifier: Send + Sync {
    fn classify(&self, subject: &SubjectContext) -> Result<f64, ClassifierError>;
}

impl<F> Classifier for F
where
    F: Fn(&SubjectContext) -> Result<f64, ClassifierError> + Send + Sync,
{
    fn classify(&self, subject: &SubjectContext) -> Result<f64, ClassifierError> {
        self(subject)
    }
}

/// Environment tag, feature flags and injected capabilities for a pass.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub environment: Environment,
    pub flags: BTreeSet<String>,
    pub classifier: Option<Arc<dyn Classifier>>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            flags: BTreeSet::new(),
            classifier: None,
        }
    }

    #[must_use]
    pub fn production() -> Self {
        Self::new(Environment::Production)
    }

    #[must_use]
    pub fn test() -> Self {
        Self::new(Environment::Test)
    }

    /// Attach a spam classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Enable a feature flag.
    #[must_use]
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    pub fn flag_enabled(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("environment", &self.environment)
            .field("flags", &self.flags)
            .field("classifier", &self.classifier.is_some())
            .finish()
    }
}

/// Everything a formula may look at besides the counts, fixed for the whole pass.
#[derive(Debug, Clone, Copy)]
pub struct TabulationContext<'a> {
    pub subject: &'a SubjectContext,
    pub execution: &'a ExecutionContext,
    pub now: DateTime<Utc>,
}

impl<'a> TabulationContext<'a> {
    pub fn new(
        subject: &'a SubjectContext,
        execution: &'a ExecutionContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            subject,
            execution,
            now,
        }
    }
}
