use std::path::Path;

use crate::commands::common::open_manager;
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_clear(db_path: &Path, config: &CliConfig) -> Result<(), CliError> {
    let manager = open_manager(db_path, config, false).await?;
    let removed = manager.get_queue_count().await;
    manager.clear_queue().await;
    println!("Removed {removed} queued actions");
    Ok(())
}
