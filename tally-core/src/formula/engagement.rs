//! Engagement quality score for comments and articles.
//!
//! ```text
//! score = reaction_points
//!       + floor(descendants / 2)
//!       + body_bonus(body)
//!       + recency_bonus(reference_timestamp)
//!       - spaminess
//! ```
//!
//! The total is truncated toward zero.

use chrono::{DateTime, Duration, Utc};

use crate::config::{EngagementConfig, RecencyTier};
use crate::context::TabulationContext;
use crate::error::{Result, TallyError};
use crate::types::{Category, CategoryCounts};

use super::MetricFormula;

/// Engagement score strategy.
#[derive(Debug, Clone)]
pub struct EngagementScore {
    config: EngagementConfig,
    categories: [Category; 2],
}

impl EngagementScore {
    pub fn new(config: EngagementConfig) -> Self {
        let categories = [
            Category::new(config.reaction_points_category.as_str()),
            Category::new(config.descendant_category.as_str()),
        ];
        Self { config, categories }
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    /// Penalty for likely spam. Zero outside production.
    pub fn spaminess(&self, ctx: &TabulationContext<'_>) -> Result<f64> {
        if !ctx.execution.environment.is_production() {
            return Ok(0.0);
        }
        if ctx.subject.author.is_none() {
            return Ok(self.config.missing_author_penalty);
        }

        let classifier = ctx.execution.classifier.as_ref().ok_or_else(|| {
            TallyError::Config("production engagement scoring requires a classifier".into())
        })?;
        let score = classifier.classify(ctx.subject).map_err(|e| {
            TallyError::StorageUnavailable(format!(
                "classifier failed for {}: {e}",
                ctx.subject.key
            ))
        })?;
        if !score.is_finite() {
            return Err(TallyError::InvalidMetric(format!(
                "classifier returned {score} for {}",
                ctx.subject.key
            )));
        }
        Ok(score.max(0.0))
    }
}

impl Default for EngagementScore {
    fn default() -> Self {
        Self::new(EngagementConfig::default())
    }
}

impl MetricFormula for EngagementScore {
    fn name(&self) -> &'static str {
        "engagement_score"
    }

    fn categories(&self) -> &[Category] {
        &self.categories
    }

    fn compute(&self, counts: &CategoryCounts, ctx: &TabulationContext<'_>) -> Result<f64> {
        let [reaction_points, descendants] = &self.categories;

        let reaction_points = counts.get(reaction_points) as f64;
        let descendant_points = (counts.get(descendants) / 2) as f64;
        let body = ctx.subject.body.as_deref().unwrap_or_default();
        let bonus = body_bonus(&self.config, body);
        let recency = recency_bonus(
            &self.config.recency_tiers,
            ctx.subject.reference_timestamp(),
            ctx.now,
        );
        let spaminess = self.spaminess(ctx)?;

        let score = reaction_points + descendant_points + bonus + recency - spaminess;
        tracing::trace!(
            subject = %ctx.subject.key,
            reaction_points,
            descendant_points,
            bonus,
            recency,
            spaminess,
            score,
            "engagement score"
        );
        Ok(score.trunc())
    }
}

/// Bonus for long bodies and bodies containing code.
pub fn body_bonus(config: &EngagementConfig, body: &str) -> f64 {
    let size = if body.chars().count() > config.size_bonus_min_chars {
        config.size_bonus
    } else {
        0.0
    };
    let code = if body.contains('`') {
        config.code_bonus
    } else {
        0.0
    };
    size + code
}

/// Sum of the flat bonuses whose window `(now - window, now]` contains `reference`.
pub fn recency_bonus(tiers: &[RecencyTier], reference: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    if reference > now {
        return 0.0;
    }
    tiers
        .iter()
        .filter(|tier| {
            let start = i64::try_from(tier.window_minutes)
                .ok()
                .and_then(Duration::try_minutes)
                .and_then(|window| now.checked_sub_signed(window));
            // A window reaching past the representable range covers everything.
            start.is_none_or(|start| reference > start)
        })
        .map(|tier| tier.bonus)
        .sum()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::context::{ClassifierError, ExecutionContext};
    use crate::types::{SubjectContext, SubjectKey};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn body_with_code(len: usize) -> String {
        let mut body = "`".to_string();
        body.push_str(&"a".repeat(len - 1));
        body
    }

    fn score(
        formula: &EngagementScore,
        counts: &CategoryCounts,
        subject: &SubjectContext,
        execution: &ExecutionContext,
    ) -> Result<f64> {
        let ctx = TabulationContext::new(subject, execution, now());
        formula.compute(counts, &ctx)
    }

    #[test]
    fn test_recent_comment_with_code_scores_every_component() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now() - Duration::days(3))
            .with_published_at(now() - Duration::minutes(30))
            .with_body(body_with_code(250))
            .with_author("ada");
        let counts = CategoryCounts::new()
            .with(Category::REACTION_POINTS, 10)
            .with(Category::DESCENDANT, 5);

        let total = score(
            &EngagementScore::default(),
            &counts,
            &subject,
            &ExecutionContext::test(),
        )
        .unwrap();

        // 10 reaction points + 2 descendant points + 3 body bonus + 379 recency
        assert_eq!(total, 394.0);
    }

    #[test]
    fn test_zero_counts_and_old_subject_score_zero() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now() - Duration::days(30));
        let total = score(
            &EngagementScore::default(),
            &CategoryCounts::new(),
            &subject,
            &ExecutionContext::test(),
        )
        .unwrap();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_body_bonus_thresholds() {
        let config = EngagementConfig::default();
        assert_eq!(body_bonus(&config, ""), 0.0);
        assert_eq!(body_bonus(&config, &"a".repeat(200)), 0.0);
        assert_eq!(body_bonus(&config, &"a".repeat(201)), 2.0);
        assert_eq!(body_bonus(&config, "use `cargo`"), 1.0);
        assert_eq!(body_bonus(&config, &body_with_code(201)), 3.0);
    }

    #[test]
    fn test_body_bonus_counts_characters_not_bytes() {
        let config = EngagementConfig::default();
        assert_eq!(body_bonus(&config, &"é".repeat(150)), 0.0);
    }

    #[test]
    fn test_recency_windows_are_half_open() {
        let tiers = vec![RecencyTier::new(60, 18.0), RecencyTier::new(180, 11.0)];

        assert_eq!(recency_bonus(&tiers, now(), now()), 29.0);
        assert_eq!(recency_bonus(&tiers, now() - Duration::minutes(59), now()), 29.0);
        // Exactly one hour old falls outside the one-hour window.
        assert_eq!(recency_bonus(&tiers, now() - Duration::minutes(60), now()), 11.0);
        assert_eq!(recency_bonus(&tiers, now() - Duration::minutes(180), now()), 0.0);
    }

    #[test]
    fn test_recency_ignores_future_references() {
        let tiers = vec![RecencyTier::new(60, 18.0)];
        assert_eq!(recency_bonus(&tiers, now() + Duration::seconds(1), now()), 0.0);
    }

    #[test]
    fn test_recency_tiers_between_boundaries() {
        let tiers = EngagementConfig::default().recency_tiers;
        assert_eq!(recency_bonus(&tiers, now() - Duration::hours(2), now()), 361.0);
        assert_eq!(recency_bonus(&tiers, now() - Duration::hours(12), now()), 280.0);
        assert_eq!(recency_bonus(&tiers, now() - Duration::hours(30), now()), 0.0);
    }

    #[test]
    fn test_odd_descendants_round_down() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now() - Duration::days(30));
        let counts = CategoryCounts::new().with(Category::DESCENDANT, 7);
        let total = score(
            &EngagementScore::default(),
            &counts,
            &subject,
            &ExecutionContext::test(),
        )
        .unwrap();
        assert_eq!(total, 3.0);
    }

    #[test]
    fn test_missing_author_is_penalized_in_production() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now() - Duration::days(30));
        let counts = CategoryCounts::new().with(Category::REACTION_POINTS, 30);
        let total = score(
            &EngagementScore::default(),
            &counts,
            &subject,
            &ExecutionContext::production(),
        )
        .unwrap();
        assert_eq!(total, -70.0);
    }

    #[test]
    fn test_classifier_score_is_subtracted_in_production() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now() - Duration::days(30))
            .with_author("ada");
        let counts = CategoryCounts::new().with(Category::REACTION_POINTS, 30);
        let execution = ExecutionContext::production().with_classifier(Arc::new(
            |_: &SubjectContext| -> std::result::Result<f64, ClassifierError> { Ok(12.5) },
        ));
        let total = score(&EngagementScore::default(), &counts, &subject, &execution).unwrap();
        assert_eq!(total, 17.0);
    }

    #[test]
    fn test_negative_classifier_score_is_clamped() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now() - Duration::days(30))
            .with_author("ada");
        let execution = ExecutionContext::production().with_classifier(Arc::new(
            |_: &SubjectContext| -> std::result::Result<f64, ClassifierError> { Ok(-4.0) },
        ));
        let ctx = TabulationContext::new(&subject, &execution, now());
        assert_eq!(EngagementScore::default().spaminess(&ctx).unwrap(), 0.0);
    }

    #[test]
    fn test_classifier_outage_is_storage_unavailable() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now()).with_author("ada");
        let execution = ExecutionContext::production().with_classifier(Arc::new(
            |_: &SubjectContext| -> std::result::Result<f64, ClassifierError> {
                Err(ClassifierError("timed out".into()))
            },
        ));
        let err = score(
            &EngagementScore::default(),
            &CategoryCounts::new(),
            &subject,
            &execution,
        )
        .unwrap_err();
        assert!(matches!(err, TallyError::StorageUnavailable(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_nan_classifier_score_is_rejected() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now()).with_author("ada");
        let execution = ExecutionContext::production().with_classifier(Arc::new(
            |_: &SubjectContext| -> std::result::Result<f64, ClassifierError> { Ok(f64::NAN) },
        ));
        let ctx = TabulationContext::new(&subject, &execution, now());
        assert!(matches!(
            EngagementScore::default().spaminess(&ctx),
            Err(TallyError::InvalidMetric(_))
        ));
    }

    #[test]
    fn test_production_without_classifier_is_config_error() {
        let subject = SubjectContext::new(SubjectKey::comment("1"), now()).with_author("ada");
        let execution = ExecutionContext::production();
        let ctx = TabulationContext::new(&subject, &execution, now());
        assert!(matches!(
            EngagementScore::default().spaminess(&ctx),
            Err(TallyError::Config(_))
        ));
    }
}
