//! Server configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/ghosttext/server.toml`
//! - Windows: `%APPDATA%/ghosttext/server.toml`

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port for the HTTP handshake endpoint.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Open a fresh editor window on every browser connection.
    #[serde(default)]
    pub new_window_on_connect: bool,

    /// Editor command run on every browser connection (empty disables
    /// it).
    #[serde(default = "default_window_command")]
    pub window_command_on_connect: String,

    /// URL-fragment to syntax-identifier mapping.
    #[serde(default)]
    pub host_to_syntax: BTreeMap<String, String>,

    /// Syntax used when no fragment matches.
    #[serde(default = "default_syntax")]
    pub default_syntax: String,
}

fn default_server_port() -> u16 {
    ghosttext_protocol::constants::DEFAULT_SERVER_PORT
}

fn default_window_command() -> String {
    "focus_window".into()
}

fn default_syntax() -> String {
    "markdown".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            new_window_on_connect: false,
            window_command_on_connect: default_window_command(),
            host_to_syntax: BTreeMap::new(),
            default_syntax: default_syntax(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not
    /// found.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("ghosttext").join("server.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("ghosttext")
            .join("server.toml"))
    }
}
