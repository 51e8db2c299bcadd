//! Engine configuration.
//!
//! Every section uses `#[serde(default)]`, so a TOML file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::context::Environment;
use crate::error::{Result, TallyError};
use crate::types::Category;

/// Default magnitude at or below which every pass runs.
const DEFAULT_LOW_THRESHOLD: u64 = 100_000;

/// Default magnitude above which the sparse sampling rate applies.
const DEFAULT_HIGH_THRESHOLD: u64 = 500_000;

/// Default weight of one conversion relative to one click.
pub const DEFAULT_CONVERSION_SUCCESS_MODIFIER: f64 = 25.0;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    /// Environment formulas run under.
    pub environment: Environment,
    /// Load-shedding policy for hot subjects.
    pub sampling: SamplingConfig,
    /// Billboard success-rate formula.
    pub success_rate: SuccessRateConfig,
    /// Comment/article engagement score formula.
    pub engagement: EngagementConfig,
    /// Windowed trend tabulation for tags.
    pub trend: TrendConfig,
}

impl TallyConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| TallyError::Config(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()?;
        self.success_rate.validate()?;
        self.engagement.validate()?;
        self.trend.validate()?;
        Ok(())
    }
}

/// Two-tier sampling policy.
///
/// magnitude <= `low_threshold` always runs; up to `high_threshold` runs with
/// `mid_probability`; above that runs with `high_probability`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub low_threshold: u64,
    pub mid_probability: f64,
    pub high_threshold: u64,
    pub high_probability: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            low_threshold: DEFAULT_LOW_THRESHOLD,
            mid_probability: 0.25,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            high_probability: 0.05,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, p) in [
            ("mid_probability", self.mid_probability),
            ("high_probability", self.high_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(TallyError::Config(format!(
                    "sampling.{name} must be within [0, 1], got {p}"
                )));
            }
        }
        if self.low_threshold > self.high_threshold {
            return Err(TallyError::Config(format!(
                "sampling.low_threshold ({}) exceeds sampling.high_threshold ({})",
                self.low_threshold, self.high_threshold
            )));
        }
        if self.high_probability > self.mid_probability {
            return Err(TallyError::Config(format!(
                "sampling.high_probability ({}) exceeds sampling.mid_probability ({})",
                self.high_probability, self.mid_probability
            )));
        }
        Ok(())
    }
}

/// Category names and weighting for the success-rate formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessRateConfig {
    pub impression_category: String,
    pub click_category: String,
    pub conversion_category: String,
    pub conversion_success_modifier: f64,
}

impl Default for SuccessRateConfig {
    fn default() -> Self {
        Self {
            impression_category: Category::IMPRESSION.to_string(),
            click_category: Category::CLICK.to_string(),
            conversion_category: Category::CONVERSION.to_string(),
            conversion_success_modifier: DEFAULT_CONVERSION_SUCCESS_MODIFIER,
        }
    }
}

impl SuccessRateConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.conversion_success_modifier.is_finite() || self.conversion_success_modifier < 0.0
        {
            return Err(TallyError::Config(format!(
                "success_rate.conversion_success_modifier must be a non-negative number, got {}",
                self.conversion_success_modifier
            )));
        }
        distinct_categories(
            "success_rate",
            &[
                self.impression_category.as_str(),
                self.click_category.as_str(),
                self.conversion_category.as_str(),
            ],
        )
    }
}

/// A flat bonus for subjects referenced within the last `window_minutes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyTier {
    pub window_minutes: u64,
    pub bonus: f64,
}

impl RecencyTier {
    #[must_use]
    pub fn new(window_minutes: u64, bonus: f64) -> Self {
        Self {
            window_minutes,
            bonus,
        }
    }
}

/// Weights for the engagement score formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    pub reaction_points_category: String,
    pub descendant_category: String,
    /// Bodies longer than this many characters earn `size_bonus`.
    pub size_bonus_min_chars: usize,
    pub size_bonus: f64,
    /// Bodies containing a backtick earn `code_bonus`.
    pub code_bonus: f64,
    pub recency_tiers: Vec<RecencyTier>,
    /// Penalty applied in production when the subject has no author.
    pub missing_author_penalty: f64,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            reaction_points_category: Category::REACTION_POINTS.to_string(),
            descendant_category: Category::DESCENDANT.to_string(),
            size_bonus_min_chars: 200,
            size_bonus: 2.0,
            code_bonus: 1.0,
            recency_tiers: vec![
                RecencyTier::new(60, 18.0),
                RecencyTier::new(3 * 60, 11.0),
                RecencyTier::new(11 * 60, 70.0),
                RecencyTier::new(26 * 60, 280.0),
            ],
            missing_author_penalty: 100.0,
        }
    }
}

impl EngagementConfig {
    pub fn validate(&self) -> Result<()> {
        let bonuses = [self.size_bonus, self.code_bonus, self.missing_author_penalty]
            .into_iter()
            .chain(self.recency_tiers.iter().map(|tier| tier.bonus));
        for value in bonuses {
            if !value.is_finite() {
                return Err(TallyError::Config(format!(
                    "engagement bonuses and penalties must be finite, got {value}"
                )));
            }
        }
        if self.missing_author_penalty < 0.0 {
            return Err(TallyError::Config(
                "engagement.missing_author_penalty must not be negative".into(),
            ));
        }
        distinct_categories(
            "engagement",
            &[
                self.reaction_points_category.as_str(),
                self.descendant_category.as_str(),
            ],
        )
    }
}

/// A category tracked twice by one formula would be summed twice per pass.
fn distinct_categories(section: &str, names: &[&str]) -> Result<()> {
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(TallyError::Config(format!(
                "{section}: category `{name}` is configured more than once"
            )));
        }
    }
    Ok(())
}

/// Windowed trend tabulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub period_days: u32,
    pub categories: Vec<String>,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            period_days: 7,
            categories: vec![
                Category::ARTICLE.to_string(),
                Category::COMMENT.to_string(),
                Category::REACTION.to_string(),
            ],
        }
    }
}

impl TrendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.period_days == 0 {
            return Err(TallyError::Config("trend.period_days must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        TallyConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = TallyConfig::from_toml_str(
            r#"
            environment = "production"

            [sampling]
            high_probability = 0.01

            [success_rate]
            conversion_success_modifier = 10.0
            "#,
        )
        .unwrap();

        assert!(config.environment.is_production());
        assert_eq!(config.sampling.high_probability, 0.01);
        assert_eq!(config.sampling.low_threshold, DEFAULT_LOW_THRESHOLD);
        assert_eq!(config.success_rate.conversion_success_modifier, 10.0);
        assert_eq!(config.success_rate.click_category, "click");
        assert_eq!(config.engagement.recency_tiers.len(), 4);
    }

    #[test]
    fn test_recency_tiers_from_toml() {
        let config = TallyConfig::from_toml_str(
            r#"
            [engagement]
            recency_tiers = [
                { window_minutes = 30, bonus = 5.0 },
                { window_minutes = 120, bonus = 2.5 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.engagement.recency_tiers,
            vec![RecencyTier::new(30, 5.0), RecencyTier::new(120, 2.5)]
        );
    }

    #[test]
    fn test_rejects_probability_out_of_range() {
        let config = SamplingConfig {
            mid_probability: 1.5,
            ..SamplingConfig::default()
        };
        assert!(matches!(config.validate(), Err(TallyError::Config(_))));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = SamplingConfig {
            low_threshold: 10,
            high_threshold: 5,
            ..SamplingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_hot_tier_sampling_more_than_warm_tier() {
        let config = SamplingConfig {
            mid_probability: 0.1,
            high_probability: 0.5,
            ..SamplingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_modifier() {
        let config = SuccessRateConfig {
            conversion_success_modifier: -1.0,
            ..SuccessRateConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_success_rate_category_used_twice() {
        let err = TallyConfig::from_toml_str(
            r#"
            [success_rate]
            impression_category = "impression"
            click_category = "impression"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, TallyError::Config(_)));
        assert!(err.to_string().contains("`impression`"));
    }

    #[test]
    fn test_rejects_engagement_category_used_twice() {
        let config = EngagementConfig {
            descendant_category: Category::REACTION_POINTS.to_string(),
            ..EngagementConfig::default()
        };
        assert!(matches!(config.validate(), Err(TallyError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_trend_period() {
        let err = TallyConfig::from_toml_str("[trend]\nperiod_days = 0\n").unwrap_err();
        assert!(err.to_string().contains("period_days"));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = TallyConfig::from_toml_str("sampling = 3").unwrap_err();
        assert!(matches!(err, TallyError::Config(_)));
    }
}
