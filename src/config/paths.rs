use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use directories::{ProjectDirs, UserDirs};

pub(crate) const APP_NAME: &str = "personaprd";

struct BaseLocations();
impl BaseLocations {
    fn proj_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("net", "crystaldrift", APP_NAME)
    }
    fn user_dirs() -> Option<UserDirs> {
        UserDirs::new()
    }
}

/*
Run artifacts in the platform data dir (~/.local/share/personaprd, ...).
User config in ~/.config/personaprd.
*/

pub(crate) trait ConfigPath {
    fn get_root_path() -> Result<PathBuf>;

    /// Get a subdir under the root path, creating as necessary.
    fn get_or_create_subdir<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        let root_path = Self::get_root_path()?;
        let full_path = subpath.map(|p| root_path.join(p)).unwrap_or(root_path);
        std::fs::create_dir_all(&full_path)?;
        Ok(full_path)
    }
}

pub(crate) struct AppData();
impl ConfigPath for AppData {
    fn get_root_path() -> Result<PathBuf> {
        BaseLocations::proj_dirs()
            .map(|d| d.data_dir().to_owned())
            .ok_or_else(|| anyhow!("Unable to determine app data dir!"))
    }
}
impl AppData {
    pub(crate) fn get_data_path<P: AsRef<Path>>(subpath: Option<P>) -> Result<PathBuf> {
        Self::get_or_create_subdir(subpath)
    }
}

pub(crate) struct UserConfig();
impl ConfigPath for UserConfig {
    /// Get the path to the user config directory.
    /// We force the XDG layout here rather than the OS-specific one.
    fn get_root_path() -> Result<PathBuf> {
        let home_dir = BaseLocations::user_dirs()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or_else(|| anyhow!("Failed to get home directory"))?;
        Ok(home_dir.join(".config").join(APP_NAME))
    }
}
impl UserConfig {
    /// Like [`ConfigPath::get_root_path`] but never touches the filesystem.
    pub(crate) fn root_path() -> Result<PathBuf> {
        Self::get_root_path()
    }
}
