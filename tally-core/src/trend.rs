//! Period-over-period activity for a subject, used for tag trends.
//!
//! For each category the current window `(now - period, now]` is compared to the prior window
//! `(now - 2 * period, now - period]`. Each ratio guards its own denominator.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::TrendConfig;
use crate::error::{Result, TallyError};
use crate::formula::guarded_ratio;
use crate::store::EventCounter;
use crate::types::{Category, SubjectKey, TimeWindow};

/// One category's activity in both windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendMetric {
    pub current: u64,
    pub prior: u64,
    /// `current / prior`, 0 when `prior` is 0.
    pub ratio: f64,
}

impl TrendMetric {
    pub fn new(current: u64, prior: u64) -> Self {
        Self {
            current,
            prior,
            ratio: guarded_ratio(current as f64, prior as f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub subject: SubjectKey,
    pub generated_at: DateTime<Utc>,
    pub period_days: u32,
    pub metrics: BTreeMap<Category, TrendMetric>,
}

impl TrendReport {
    pub fn get(&self, category: &str) -> Option<&TrendMetric> {
        self.metrics.get(&Category::new(category))
    }
}

/// Computes [`TrendReport`]s from windowed event sums.
pub struct TrendTabulator {
    counter: Arc<dyn EventCounter>,
    clock: Arc<dyn Clock>,
    config: TrendConfig,
}

impl TrendTabulator {
    pub fn new(counter: Arc<dyn EventCounter>, config: TrendConfig) -> Self {
        Self {
            counter,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    pub async fn tabulate(&self, subject: &SubjectKey) -> Result<TrendReport> {
        let now = self.clock.now();
        let (current_window, prior_window) = windows(now, self.config.period_days)?;

        let mut metrics = BTreeMap::new();
        for name in &self.config.categories {
            let category = Category::new(name.as_str());
            let current = self
                .counter
                .sum_window(subject, &category, current_window)
                .await?;
            let prior = self
                .counter
                .sum_window(subject, &category, prior_window)
                .await?;
            metrics.insert(category, TrendMetric::new(current, prior));
        }

        debug!(%subject, period_days = self.config.period_days, "trend tabulated");
        Ok(TrendReport {
            subject: subject.clone(),
            generated_at: now,
            period_days: self.config.period_days,
            metrics,
        })
    }
}

impl std::fmt::Debug for TrendTabulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendTabulator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn windows(now: DateTime<Utc>, period_days: u32) -> Result<(TimeWindow, TimeWindow)> {
    let out_of_range =
        || TallyError::Config(format!("trend period of {period_days} days is out of range"));
    let period = Duration::try_days(i64::from(period_days)).ok_or_else(out_of_range)?;
    let boundary = now.checked_sub_signed(period).ok_or_else(out_of_range)?;
    let start = boundary.checked_sub_signed(period).ok_or_else(out_of_range)?;
    Ok((
        TimeWindow::between(Some(boundary), now),
        TimeWindow::between(Some(start), boundary),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryEventLog;
    use crate::types::EventRecord;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_windows_meet_without_overlap() {
        let (current, prior) = windows(now(), 7).unwrap();
        assert_eq!(current.until, Some(now()));
        assert_eq!(current.after, prior.until);
        assert_eq!(prior.after, Some(now() - Duration::days(14)));
        let boundary = now() - Duration::days(7);
        assert!(prior.contains(boundary));
        assert!(!current.contains(boundary));
    }

    #[test]
    fn test_metric_ratio_guards_zero_prior() {
        assert_eq!(TrendMetric::new(5, 0).ratio, 0.0);
        assert_eq!(TrendMetric::new(6, 3).ratio, 2.0);
        assert_eq!(TrendMetric::new(0, 0).ratio, 0.0);
    }

    #[tokio::test]
    async fn test_tabulate_compares_periods() {
        let tag = SubjectKey::tag("rust");
        let log = Arc::new(InMemoryEventLog::new());
        log.append_batch([
            EventRecord::new(tag.clone(), Category::ARTICLE, now() - Duration::days(1))
                .with_counts_for(4),
            EventRecord::new(tag.clone(), Category::ARTICLE, now() - Duration::days(8))
                .with_counts_for(2),
            EventRecord::new(tag.clone(), Category::COMMENT, now() - Duration::days(2))
                .with_counts_for(3),
            // Outside both windows.
            EventRecord::new(tag.clone(), Category::REACTION, now() - Duration::days(20)),
        ])
        .await;

        let tabulator = TrendTabulator::new(log, TrendConfig::default())
            .with_clock(Arc::new(ManualClock::new(now())));
        let report = tabulator.tabulate(&tag).await.unwrap();

        assert_eq!(report.period_days, 7);
        assert_eq!(report.generated_at, now());
        assert_eq!(report.get(Category::ARTICLE), Some(&TrendMetric::new(4, 2)));
        assert_eq!(report.get(Category::ARTICLE).map(|m| m.ratio), Some(2.0));
        // A zero prior in one category does not affect the others.
        assert_eq!(report.get(Category::COMMENT).map(|m| m.ratio), Some(0.0));
        assert_eq!(report.get(Category::REACTION), Some(&TrendMetric::new(0, 0)));
    }

    #[test]
    fn test_huge_period_is_config_error() {
        assert!(matches!(
            windows(now(), u32::MAX),
            Err(TallyError::Config(_))
        ));
    }
}
