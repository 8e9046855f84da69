use std::path::Path;

use errand_core::ActionKind;

use crate::commands::common::{open_manager, parse_payload};
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_enqueue(
    kind: &str,
    payload: Option<&str>,
    db_path: &Path,
    config: &CliConfig,
) -> Result<(), CliError> {
    let kind = kind.parse::<ActionKind>()?;
    let payload = parse_payload(payload)?;
    let manager = open_manager(db_path, config, false).await?;

    let id = manager.enqueue(kind, payload, false).await;
    println!("{id}");
    Ok(())
}
