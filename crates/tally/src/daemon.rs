//! Daemon wiring: compaction scheduler plus signal handling.

use std::path::Path;
use std::sync::Arc;

use miette::Result;
use tokio::sync::watch;
use tracing::{error, info};

use tally_model::MapDirectory;
use tally_scheduler::{CompactionScheduler, SchedulerConfig};
use tally_store::{SummaryEngine, SummaryStore};

/// Run the compaction loop until ctrl-c.
///
/// The daemon never fans tasks out itself, so it needs no grants; writers
/// keep appending to the journal from their own processes while this one
/// folds it down.
pub async fn run(db: &Path, interval: u64, max_batch: Option<usize>) -> Result<()> {
    let store = SummaryStore::open(db).map_err(|e| miette::miette!("{}", e))?;
    let engine = Arc::new(SummaryEngine::new(store, MapDirectory::new()));

    let scheduler = CompactionScheduler::new(
        engine,
        SchedulerConfig {
            interval_secs: interval,
            max_batch,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}
