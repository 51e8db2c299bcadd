use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use tally_core::{
    EngagementScore, IncrementalAggregator, MetricFormula, RecountSummary, Recounter,
    SubjectKind, SuccessRate, TieredSamplingGate,
};
use tally_turso::TursoStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;

#[derive(Args)]
pub struct RecountArgs {
    /// Subject kind to recount (article, comment, billboard)
    #[arg(long)]
    pub kind: SubjectKind,

    /// Keep recounting every `recount.interval_secs` until Ctrl-C
    #[arg(long)]
    pub watch: bool,

    /// Override `recount.concurrency`
    #[arg(long)]
    pub concurrency: Option<usize>,
}

pub async fn run(args: RecountArgs, config: &WorkerConfig) -> Result<()> {
    let store = super::open_store(config).await?;
    let aggregator = build_aggregator(args.kind, store, config)?;
    let recounter = Recounter::new(Arc::new(aggregator))
        .with_concurrency(args.concurrency.unwrap_or(config.recount.concurrency));

    if !args.watch {
        let summary = recounter.recount_kind(args.kind).await?;
        return report(&summary);
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Shutdown requested");
        signal.cancel();
    });

    let interval = Duration::from_secs(config.recount.interval_secs);
    watch(&recounter, args.kind, interval, shutdown).await
}

/// Aggregator for a subject kind: success rate with load shedding for billboards, engagement
/// score for articles and comments.
pub fn build_aggregator(
    kind: SubjectKind,
    store: Arc<TursoStore>,
    config: &WorkerConfig,
) -> Result<IncrementalAggregator> {
    let formula: Arc<dyn MetricFormula> = match kind {
        SubjectKind::Billboard => Arc::new(SuccessRate::new(&config.engine.success_rate)),
        SubjectKind::Article | SubjectKind::Comment => {
            Arc::new(EngagementScore::new(config.engine.engagement.clone()))
        }
        SubjectKind::Tag => bail!("tags have no stored metric; use `trend --id <tag>`"),
    };

    let aggregator = IncrementalAggregator::new(store.clone(), store.clone(), store, formula)
        .with_execution(super::execution_context(config));
    Ok(match kind {
        SubjectKind::Billboard => aggregator.with_gate(Arc::new(TieredSamplingGate::new(
            config.engine.sampling.clone(),
        ))),
        _ => aggregator,
    })
}

/// Recount every `interval` until `shutdown` is cancelled. A pass in progress runs to
/// completion.
pub async fn watch(
    recounter: &Recounter,
    kind: SubjectKind,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(%kind, interval_secs = interval.as_secs(), "Recount worker started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match recounter.recount_kind(kind).await {
                Ok(summary) => report(&summary)?,
                Err(e) => error!(%kind, error = %e, "Recount failed"),
            },
        }
    }

    info!(%kind, "Recount worker stopped");
    Ok(())
}

fn report(summary: &RecountSummary) -> Result<()> {
    info!(
        committed = summary.committed,
        skipped = summary.skipped,
        failed = summary.failures.len(),
        "Recount complete"
    );
    super::print_json(summary)
}
