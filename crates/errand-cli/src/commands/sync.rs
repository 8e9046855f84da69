use std::path::Path;

use errand_core::models::SyncProgress;
use errand_core::sync::QueueEvent;

use crate::commands::common::{format_result_line, open_backend_manager};
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_sync(db_path: &Path, config: &CliConfig) -> Result<(), CliError> {
    let manager = open_backend_manager(db_path, config).await?;
    if manager.get_queue_count().await == 0 {
        println!("Queue is empty.");
        return Ok(());
    }

    let subscription = manager
        .on_queue_change(|event: &QueueEvent| {
            if let QueueEvent::Evicted(result) = event {
                eprintln!("dropped {}", format_result_line(result));
            }
        })
        .await;

    let on_progress: &(dyn Fn(SyncProgress) + Send + Sync) = &|progress: SyncProgress| {
        tracing::debug!("Synced {}/{}", progress.completed, progress.total);
    };
    let summary = manager.sync_all(Some(on_progress)).await;
    subscription.unsubscribe();

    let remaining = manager.get_queue_count().await;
    println!(
        "Sync completed: {} delivered, {} failed, {} skipped, {} still queued",
        summary.succeeded, summary.failed, summary.skipped, remaining
    );
    Ok(())
}
