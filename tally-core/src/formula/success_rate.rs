//! Billboard success rate.

use crate::config::SuccessRateConfig;
use crate::context::TabulationContext;
use crate::error::Result;
use crate::types::{Category, CategoryCounts};

use super::{MetricFormula, guarded_ratio};

/// `(clicks + conversions * conversion_success_modifier) / impressions`, 0 without impressions.
#[derive(Debug, Clone)]
pub struct SuccessRate {
    categories: [Category; 3],
    conversion_success_modifier: f64,
}

impl SuccessRate {
    pub fn new(config: &SuccessRateConfig) -> Self {
        Self {
            categories: [
                Category::new(config.impression_category.as_str()),
                Category::new(config.click_category.as_str()),
                Category::new(config.conversion_category.as_str()),
            ],
            conversion_success_modifier: config.conversion_success_modifier,
        }
    }

    /// Rate from raw totals.
    pub fn rate(&self, impressions: u64, clicks: u64, conversions: u64) -> f64 {
        let weighted = clicks as f64 + conversions as f64 * self.conversion_success_modifier;
        guarded_ratio(weighted, impressions as f64)
    }
}

impl Default for SuccessRate {
    fn default() -> Self {
        Self::new(&SuccessRateConfig::default())
    }
}

impl MetricFormula for SuccessRate {
    fn name(&self) -> &'static str {
        "success_rate"
    }

    fn categories(&self) -> &[Category] {
        &self.categories
    }

    fn magnitude_category(&self) -> Option<&Category> {
        self.categories.first()
    }

    fn compute(&self, counts: &CategoryCounts, _ctx: &TabulationContext<'_>) -> Result<f64> {
        let [impressions, clicks, conversions] = &self.categories;
        Ok(self.rate(
            counts.get(impressions),
            counts.get(clicks),
            counts.get(conversions),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::types::{SubjectContext, SubjectKey};
    use chrono::Utc;

    fn compute(formula: &SuccessRate, counts: &CategoryCounts) -> f64 {
        let subject = SubjectContext::new(SubjectKey::billboard("1"), Utc::now());
        let execution = ExecutionContext::test();
        let ctx = TabulationContext::new(&subject, &execution, Utc::now());
        formula.compute(counts, &ctx).unwrap()
    }

    #[test]
    fn test_all_zero_counts_give_zero() {
        let rate = compute(&SuccessRate::default(), &CategoryCounts::new());
        assert_eq!(rate, 0.0);
        assert!(rate.is_finite());
    }

    #[test]
    fn test_clicks_without_impressions_give_zero() {
        let counts = CategoryCounts::new()
            .with(Category::CLICK, 12)
            .with(Category::CONVERSION, 3);
        assert_eq!(compute(&SuccessRate::default(), &counts), 0.0);
    }

    #[test]
    fn test_conversions_are_weighted() {
        let counts = CategoryCounts::new()
            .with(Category::IMPRESSION, 1000)
            .with(Category::CLICK, 50)
            .with(Category::CONVERSION, 2);
        let rate = compute(&SuccessRate::default(), &counts);
        assert!((rate - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_custom_category_names_and_modifier() {
        let config = SuccessRateConfig {
            impression_category: "view".into(),
            click_category: "tap".into(),
            conversion_category: "signup".into(),
            conversion_success_modifier: 10.0,
        };
        let formula = SuccessRate::new(&config);
        let names: Vec<&str> = formula.categories().iter().map(Category::as_str).collect();
        assert_eq!(names, ["view", "tap", "signup"]);
        assert_eq!(formula.magnitude_category(), Some(&Category::new("view")));

        let counts = CategoryCounts::new()
            .with("view", 200)
            .with("tap", 10)
            .with("signup", 1)
            .with(Category::CLICK, 500);
        assert!((compute(&formula, &counts) - 0.1).abs() < 1e-12);
    }
}
