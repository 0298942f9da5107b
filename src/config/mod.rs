//! Configuration module for agentbox-ssh-proxy
//!
//! This module handles loading and parsing of configuration files,
//! including environment variable expansion and path resolution.

mod file;

use crate::filter::AllowList;
use crate::utils::path::{default_sockets_dir, expand_path};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use file::{ConfigFile, ConfigPath, config_search_paths, find_config_file, load_config};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path to the upstream SSH agent socket
    /// Supports environment variable expansion (e.g., $SSH_AUTH_SOCK)
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Path to the JSONL audit log
    /// Supports environment variable and tilde expansion
    #[serde(default)]
    pub log_path: Option<String>,

    /// Directory holding the per-proxy socket directories
    #[serde(default)]
    pub sockets_dir: Option<String>,

    /// SSH forwarding settings
    #[serde(default)]
    pub ssh: SshConfig,
}

/// SSH forwarding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    /// Whether SSH forwarding is enabled at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How the agent reaches the container
    #[serde(default)]
    pub forward_mode: ForwardMode,

    /// Listening transport for the proxy
    #[serde(default)]
    pub transport: TransportKind,

    /// Comment substrings or `SHA256:` fingerprint prefixes; empty allows all keys
    #[serde(default)]
    pub allowed_keys: Vec<String>,
}

/// How SSH credentials are made available to a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// Filtering proxy in front of the host agent
    #[default]
    Proxy,
    /// Host agent socket mounted directly, unfiltered
    Agent,
    /// Key files copied into the container
    Keys,
    /// No SSH access
    Off,
}

impl ForwardMode {
    /// Only `proxy` mode is served by this component
    pub fn routes_through_proxy(self) -> bool {
        self == ForwardMode::Proxy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ForwardMode::Proxy => "proxy",
            ForwardMode::Agent => "agent",
            ForwardMode::Keys => "keys",
            ForwardMode::Off => "off",
        }
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listening transport as written in the config file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Unix,
    /// For container runtimes that cannot mount host sockets
    Tcp,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream: default_upstream(),
            log_path: None,
            sockets_dir: None,
            ssh: SshConfig::default(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            forward_mode: ForwardMode::default(),
            transport: TransportKind::default(),
            allowed_keys: Vec::new(),
        }
    }
}

fn default_upstream() -> String {
    "$SSH_AUTH_SOCK".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Expand environment variables and tilde in all paths and parse the
    /// allow-list
    pub fn expand(&self) -> crate::Result<ExpandedConfig> {
        let upstream = expand_path(&self.upstream)?;
        let log_path = self.log_path.as_deref().map(expand_path).transpose()?;
        let sockets_dir = match &self.sockets_dir {
            Some(dir) => PathBuf::from(expand_path(dir)?),
            None => default_sockets_dir(),
        };

        Ok(ExpandedConfig {
            upstream: PathBuf::from(upstream),
            log_path: log_path.map(PathBuf::from),
            sockets_dir,
            enabled: self.ssh.enabled,
            forward_mode: self.ssh.forward_mode,
            transport: self.ssh.transport,
            allow_list: AllowList::parse(&self.ssh.allowed_keys)?,
        })
    }
}

/// Configuration with all paths expanded
#[derive(Debug, Clone)]
pub struct ExpandedConfig {
    /// Resolved path to the upstream SSH agent socket
    pub upstream: PathBuf,

    /// Resolved path to the audit log
    pub log_path: Option<PathBuf>,

    /// Resolved sockets directory
    pub sockets_dir: PathBuf,

    pub enabled: bool,
    pub forward_mode: ForwardMode,
    pub transport: TransportKind,

    /// Parsed allow-list
    pub allow_list: AllowList,
}

impl ExpandedConfig {
    /// Why the proxy must not start, if it must not
    pub fn proxy_disabled_reason(&self) -> Option<String> {
        if !self.enabled {
            return Some("SSH forwarding is disabled (ssh.enabled = false)".to_string());
        }
        if !self.forward_mode.routes_through_proxy() {
            return Some(format!(
                "SSH forward mode is '{}'; the proxy only serves 'proxy' mode",
                self.forward_mode
            ));
        }
        None
    }
}
