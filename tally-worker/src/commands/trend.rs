use anyhow::Result;
use clap::Args;
use tally_core::{SubjectKey, TrendTabulator};

use crate::config::WorkerConfig;

#[derive(Args)]
pub struct TrendArgs {
    /// Tag name
    #[arg(long)]
    pub id: String,

    /// Override the comparison period in days
    #[arg(long)]
    pub period_days: Option<u32>,
}

/// Print period-over-period activity for a tag.
pub async fn run(args: TrendArgs, config: &WorkerConfig) -> Result<()> {
    let mut trend = config.engine.trend.clone();
    if let Some(days) = args.period_days {
        trend.period_days = days;
    }
    trend.validate()?;

    let store = super::open_store(config).await?;
    let report = TrendTabulator::new(store, trend)
        .tabulate(&SubjectKey::tag(args.id))
        .await?;
    super::print_json(&report)
}
