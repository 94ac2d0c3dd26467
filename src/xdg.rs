//! XDG Base Directory support for vellum.

use anyhow::{Context, Result};
use std::path::PathBuf;

const APP_NAME: &str = "vellum";

/// Get the configuration directory following XDG conventions.
///
/// Returns `$XDG_CONFIG_HOME/vellum` or `~/.config/vellum`.
pub fn get_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .context("Failed to determine config directory")
}

/// Get the data directory following XDG conventions.
///
/// Returns `$XDG_DATA_HOME/vellum` or `~/.local/share/vellum`.
pub fn get_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|p| p.join(APP_NAME))
        .context("Failed to determine data directory")
}

/// Default directory for per-window cache dump files.
pub fn get_dump_dir() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("dumps"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_config_dir() {
        let dir = get_config_dir().unwrap();
        assert!(dir.ends_with("vellum"));
    }

    #[test]
    fn test_dump_dir_is_under_data_dir() {
        let data = get_data_dir().unwrap();
        let dumps = get_dump_dir().unwrap();
        assert!(dumps.starts_with(&data));
    }
}
