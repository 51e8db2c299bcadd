use anyhow::Result;
use clap::Args;
use tally_core::{CheckpointStore, SubjectKey, SubjectKind};

use crate::config::WorkerConfig;

#[derive(Args)]
pub struct ShowArgs {
    /// Subject kind (article, comment, billboard, tag)
    #[arg(long)]
    pub kind: SubjectKind,

    /// Subject identifier
    #[arg(long)]
    pub id: String,
}

/// Print the stored checkpoint for one subject.
pub async fn run(args: ShowArgs, config: &WorkerConfig) -> Result<()> {
    let store = super::open_store(config).await?;
    let checkpoint = store.read(&SubjectKey::new(args.kind, args.id)).await?;
    super::print_json(&checkpoint)
}
