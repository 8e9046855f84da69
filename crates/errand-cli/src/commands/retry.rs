use std::path::Path;

use crate::commands::common::{format_result_line, open_backend_manager, resolve_action_id};
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_retry(id: &str, db_path: &Path, config: &CliConfig) -> Result<(), CliError> {
    let manager = open_backend_manager(db_path, config).await?;
    let action_id = resolve_action_id(id, &manager.get_queue().await)?;

    let result = manager
        .run_one(action_id)
        .await
        .ok_or_else(|| CliError::ActionNotFound(action_id.to_string()))?;
    println!("{}", format_result_line(&result));
    Ok(())
}
