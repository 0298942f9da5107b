//! Argument structures for CLI commands

use clap::Args;
use std::path::PathBuf;

/// Arguments for the `run` command
///
/// Each flag overrides the matching configuration file value.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Upstream SSH agent socket path
    ///
    /// Defaults to the configured upstream, which itself defaults to SSH_AUTH_SOCK
    #[arg(short, long)]
    pub upstream: Option<PathBuf>,

    /// Allow-list entry (repeatable): a comment substring or a SHA256 fingerprint prefix
    ///
    /// Replaces the configured allowed_keys when given.
    ///
    /// Examples:
    ///   --allow laptop
    ///   --allow SHA256:uNiVztksCsDhcc0u9e8BujQXVUpKZIDTMczCvj3tD2s
    #[arg(short, long, value_name = "ENTRY")]
    pub allow: Vec<String>,

    /// Listen on a TCP port instead of a Unix socket
    #[arg(long)]
    pub tcp: bool,

    /// Directory for per-proxy socket directories
    #[arg(long)]
    pub sockets_dir: Option<PathBuf>,

    /// Path to JSONL audit log file
    #[arg(long)]
    pub log: Option<PathBuf>,
}

/// Arguments for the `config` command
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Show config file search paths
    #[arg(long)]
    pub paths: bool,

    /// Show an example configuration
    #[arg(long)]
    pub example: bool,

    /// Output format
    #[arg(short, long, default_value = "toml", value_parser = ["toml", "json"])]
    pub format: String,
}

/// Arguments for the `cleanup` command
#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// Directory to scan (defaults to the configured sockets directory)
    #[arg(long)]
    pub sockets_dir: Option<PathBuf>,
}
