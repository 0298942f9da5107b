//! CLI module for agentbox-ssh-proxy
//!
//! This module provides the command-line interface using clap derive macros.

pub mod args;
pub mod commands;
pub mod exit_code;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use args::{CleanupArgs, ConfigArgs, RunArgs};

/// Filtering SSH agent proxy for sandboxed containers
#[derive(Parser, Debug)]
#[command(name = "agentbox-ssh-proxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "AGENTBOX_SSH_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the proxy in the foreground until Ctrl-C
    Run(RunArgs),

    /// Show the resolved configuration or its search paths
    Config(ConfigArgs),

    /// Remove socket directories left behind by dead proxies
    Cleanup(CleanupArgs),

    /// Show version information (build details with --verbose)
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "agentbox-ssh-proxy",
            "--verbose",
            "run",
            "--upstream",
            "/tmp/agent.sock",
            "--allow",
            "laptop",
            "--allow",
            "SHA256:abc",
            "--tcp",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.upstream, Some(PathBuf::from("/tmp/agent.sock")));
        assert_eq!(args.allow, vec!["laptop", "SHA256:abc"]);
        assert!(args.tcp);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let result = Cli::try_parse_from(["agentbox-ssh-proxy", "--verbose", "--quiet", "version"]);
        assert!(result.is_err());
    }
}
