// ABOUTME: Standardized paths for config and data storage
// ABOUTME: Uses ~/.config/sechat for config and ~/.local/share/sechat for data

use directories::BaseDirs;
use std::path::PathBuf;

const APP_DIR: &str = "sechat";

fn home_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the config directory path: ~/.config/sechat/
pub fn config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_DIR)
}

/// Get the default config file path: ~/.config/sechat/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the data directory path: ~/.local/share/sechat/
/// Falls back to ./data if home directory unavailable
pub fn data_dir() -> PathBuf {
    let home = home_dir();
    if home == PathBuf::from(".") {
        PathBuf::from("./data")
    } else {
        home.join(".local").join("share").join(APP_DIR)
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        match BaseDirs::new() {
            Some(base_dirs) => {
                return base_dirs
                    .home_dir()
                    .join(stripped)
                    .to_string_lossy()
                    .to_string()
            }
            None => tracing::warn!(
                path = %path,
                "Failed to expand tilde in path: could not determine home directory"
            ),
        }
    } else if path == "~" {
        if let Some(base_dirs) = BaseDirs::new() {
            return base_dirs.home_dir().to_string_lossy().to_string();
        }
    }
    path.to_string()
}
