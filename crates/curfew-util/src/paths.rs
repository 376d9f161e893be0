//! Default paths for curfewd components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/curfewd/curfewd.sock` or `/tmp/curfewd-$USER/curfewd.sock`
//! - Data: `$XDG_DATA_HOME/curfewd` or `~/.local/share/curfewd`
//! - Config: `$XDG_CONFIG_HOME/curfewd/config.toml` or `~/.config/curfewd/config.toml`

use std::path::PathBuf;

/// Socket filename within the socket directory
const SOCKET_FILENAME: &str = "curfewd.sock";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "curfews.db";

/// Application subdirectory name
const APP_DIR: &str = "curfewd";

/// Get the socket path without checking CURFEW_SOCKET.
/// `$XDG_RUNTIME_DIR/curfewd/curfewd.sock`, else `/tmp/curfewd-$USER/curfewd.sock`.
/// The env override is applied by the daemon's CLI.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the data directory without checking CURFEW_DATA_DIR.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default config file path.
///
/// `$XDG_CONFIG_HOME/curfewd/config.toml`, then `~/.config/curfewd/config.toml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}
