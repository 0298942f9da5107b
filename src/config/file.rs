//! Configuration file discovery and loading

use std::path::{Path, PathBuf};

use super::Config;

/// Configuration file wrapper with path information
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Path where the configuration was loaded from (empty for defaults)
    pub path: PathBuf,

    /// The parsed configuration
    pub config: Config,
}

/// Configuration file search path with description
#[derive(Debug, Clone)]
pub struct ConfigPath {
    /// The actual file path
    pub path: PathBuf,
    /// Human-readable description for display
    pub description: &'static str,
}

/// Standard configuration file name
const CONFIG_FILE_NAME: &str = "ssh-proxy.toml";

/// Application name for directory paths
const APP_NAME: &str = "agentbox";

/// Get all configuration search paths with descriptions (in priority order)
///
/// Search order:
/// 1. `$XDG_CONFIG_HOME/agentbox/ssh-proxy.toml` (if env var set)
/// 2. `~/.config/agentbox/ssh-proxy.toml`
/// 3. `~/.agentbox/ssh-proxy.toml`
pub fn config_search_paths() -> Vec<ConfigPath> {
    let mut paths = Vec::new();

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            paths.push(ConfigPath {
                path: PathBuf::from(xdg).join(APP_NAME).join(CONFIG_FILE_NAME),
                description: "$XDG_CONFIG_HOME/agentbox/ssh-proxy.toml",
            });
        }
    }

    if let Some(home) = dirs::home_dir() {
        let dotconfig = home.join(".config").join(APP_NAME).join(CONFIG_FILE_NAME);
        if !paths.iter().any(|p| p.path == dotconfig) {
            paths.push(ConfigPath {
                path: dotconfig,
                description: "~/.config/agentbox/ssh-proxy.toml",
            });
        }
        paths.push(ConfigPath {
            path: home.join(format!(".{}", APP_NAME)).join(CONFIG_FILE_NAME),
            description: "~/.agentbox/ssh-proxy.toml",
        });
    }

    paths
}

/// Find the configuration file in standard locations
///
/// Returns `None` if no configuration file is found.
pub fn find_config_file() -> Option<PathBuf> {
    for cp in config_search_paths() {
        if cp.path.is_file() {
            tracing::debug!(path = %cp.path.display(), "Found configuration file");
            return Some(cp.path);
        }
    }

    tracing::debug!("No configuration file found in standard locations");
    None
}

/// Load configuration from the specified path
pub fn load_config(path: &Path) -> crate::Result<ConfigFile> {
    tracing::debug!("Loading configuration from: {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read configuration file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse configuration file '{}': {}",
            path.display(),
            e
        ))
    })?;

    Ok(ConfigFile {
        path: path.to_path_buf(),
        config,
    })
}

impl ConfigFile {
    /// Load from an explicit path, else the first standard location, else
    /// defaults
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        if let Some(p) = path {
            return load_config(p);
        }
        match find_config_file() {
            Some(p) => load_config(&p),
            None => Ok(Self {
                path: PathBuf::new(),
                config: Config::default(),
            }),
        }
    }

    /// Whether the configuration came from a file
    pub fn is_from_file(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }
}
