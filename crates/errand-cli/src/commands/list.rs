use std::path::Path;

use crate::commands::common::{
    action_to_list_item, dispatch_order, format_action_lines, open_manager, ActionListItem,
};
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_list(as_json: bool, db_path: &Path, config: &CliConfig) -> Result<(), CliError> {
    let manager = open_manager(db_path, config, false).await?;
    let actions = dispatch_order(manager.get_queue().await);

    if as_json {
        let json_items = actions
            .iter()
            .map(action_to_list_item)
            .collect::<Vec<ActionListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if actions.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_action_lines(&actions) {
        println!("{line}");
    }
    Ok(())
}
