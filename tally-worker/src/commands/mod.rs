pub mod config;
pub mod recount;
pub mod show;
pub mod trend;

use std::sync::Arc;

use anyhow::{Context, Result};
use tally_core::ExecutionContext;
use tally_turso::TursoStore;
use tracing::{debug, warn};

use crate::classifier::TermClassifier;
use crate::config::WorkerConfig;

/// Open the configured database, creating its directory when needed.
pub async fn open_store(config: &WorkerConfig) -> Result<Arc<TursoStore>> {
    let path = &config.database.path;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    debug!(path = %path.display(), "opening database");
    let store = TursoStore::new_local(path)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Execution context for passes run by this worker.
pub fn execution_context(config: &WorkerConfig) -> ExecutionContext {
    let execution = ExecutionContext::new(config.engine.environment);
    match &config.classifier {
        Some(classifier) => execution.with_classifier(Arc::new(TermClassifier::new(classifier))),
        None => {
            if execution.environment.is_production() {
                warn!("no [classifier] configured; production engagement passes will fail");
            }
            execution
        }
    }
}

/// Print a value as pretty JSON on stdout.
fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
