mod paths;
mod settings;

use anyhow::Result;
use paths::{AppData, UserConfig};
use std::path::{Path, PathBuf};

pub use settings::{CONFIG_FILE_NAME, DEFAULT_LLM_MODEL, PipelineConfig};

/// Get or create a subdirectory in the app data dir.
/// - [`subpath`]: If Some(P), a subdirectory will be created if necessary
///   and returned. If None, the root app data directory will be returned.
pub fn get_or_create_app_data_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
    AppData::get_data_path(subpath)
}

/// Where run artifacts go when the config names no `output_root`.
pub fn default_output_root() -> Result<PathBuf> {
    get_or_create_app_data_path(Some("output"))
}

/// `~/.config/personaprd/config.toml`. The file may not exist.
pub fn user_config_file() -> Result<PathBuf> {
    Ok(UserConfig::root_path()?.join(CONFIG_FILE_NAME))
}

/// Load the config from `explicit` if given, else from the user config file
/// if it exists, else defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    match explicit {
        Some(path) => PipelineConfig::load(path),
        None => {
            let path = user_config_file()?;
            if path.exists() {
                PipelineConfig::load(&path)
            } else {
                Ok(PipelineConfig::default())
            }
        }
    }
}
