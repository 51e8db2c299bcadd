use tally_core::{Classifier, ClassifierError, SubjectContext};

use crate::config::ClassifierConfig;

/// Scores a subject by counting blocked terms in its body.
#[derive(Debug, Clone)]
pub struct TermClassifier {
    terms: Vec<String>,
    penalty_per_match: f64,
}

impl TermClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            terms: config
                .terms
                .iter()
                .map(|term| term.trim().to_lowercase())
                .filter(|term| !term.is_empty())
                .collect(),
            penalty_per_match: config.penalty_per_match,
        }
    }
}

impl Classifier for TermClassifier {
    fn classify(&self, subject: &SubjectContext) -> Result<f64, ClassifierError> {
        let Some(body) = subject.body.as_deref() else {
            return Ok(0.0);
        };
        let body = body.to_lowercase();
        let matches = self
            .terms
            .iter()
            .filter(|term| body.contains(term.as_str()))
            .count();
        Ok(matches as f64 * self.penalty_per_match)
    }
}
