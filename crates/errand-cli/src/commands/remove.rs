use std::path::Path;

use crate::commands::common::{open_manager, resolve_action_id};
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_remove(id: &str, db_path: &Path, config: &CliConfig) -> Result<(), CliError> {
    let manager = open_manager(db_path, config, false).await?;
    let action_id = resolve_action_id(id, &manager.get_queue().await)?;

    if !manager.remove_action(action_id).await {
        return Err(CliError::ActionNotFound(action_id.to_string()));
    }
    println!("{action_id}");
    Ok(())
}
