use std::path::{Path, PathBuf};

use errand_core::util::normalize_text_option;

use crate::cli::ConfigCommands;
use crate::config::{normalize_api_base_url, CliConfig};
use crate::error::CliError;

pub fn run_config(
    command: ConfigCommands,
    config_path: &Path,
    config: &CliConfig,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            Ok(())
        }
        ConfigCommands::Init {
            api_base_url,
            api_token,
            db_path,
        } => {
            let updated = merge_config_init(config.clone(), api_base_url, api_token, db_path)?;
            updated.save_to_path(config_path).map_err(CliError::Config)?;
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

/// Apply `config init` flags on top of the existing config; unset flags keep
/// the current values.
pub fn merge_config_init(
    mut config: CliConfig,
    api_base_url: Option<String>,
    api_token: Option<String>,
    db_path: Option<PathBuf>,
) -> Result<CliConfig, CliError> {
    if let Some(url) = normalize_text_option(api_base_url) {
        config.api_base_url = Some(normalize_api_base_url(url).map_err(CliError::Config)?);
    }
    if let Some(token) = normalize_text_option(api_token) {
        config.api_token = Some(token);
    }
    if let Some(path) = db_path {
        config.db_path = Some(path);
    }
    Ok(config)
}
