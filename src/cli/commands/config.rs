//! Config command - show the resolved configuration

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli::args::ConfigArgs;
use crate::config::{ConfigFile, config_search_paths};

/// Example configuration content
fn example_config() -> &'static str {
    r#"# agentbox-ssh-proxy configuration file

# Host SSH agent socket
# Default: $SSH_AUTH_SOCK
# upstream = "/run/user/1000/ssh-agent.sock"

# Optional JSONL audit log of allow/deny decisions
# log_path = "~/.local/state/agentbox/ssh-proxy.jsonl"

# Where per-proxy socket directories are created
# Default: ~/.agentbox/sockets
# sockets_dir = "~/.agentbox/sockets"

[ssh]
enabled = true

# proxy | agent | keys | off (only "proxy" starts this component)
forward_mode = "proxy"

# unix | tcp (tcp for runtimes that cannot mount host sockets)
transport = "unix"

# Keys visible to the container. Empty allows every key.
#   "laptop"          comment contains "laptop" (case-insensitive)
#   "SHA256:uNiVzt"   SHA-256 fingerprint starts with this prefix
allowed_keys = []
"#
}

/// Execute the config command
pub async fn execute(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    if args.paths {
        println!("Config search paths (in priority order):");
        for (i, cp) in config_search_paths().iter().enumerate() {
            let exists = if cp.path.is_file() { "[exists]" } else { "" };
            println!("  {}. {} {}", i + 1, cp.description, exists);
            println!("     {}", cp.path.display());
        }
        return Ok(());
    }

    if args.example {
        match args.format.as_str() {
            "json" => {
                let config: toml::Value =
                    toml::from_str(example_config()).context("Failed to parse example config")?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            _ => print!("{}", example_config()),
        }
        return Ok(());
    }

    let config_file =
        ConfigFile::load(config_path.as_deref()).context("Failed to load configuration")?;
    // Parse the allow-list too, so bad entries surface here
    config_file
        .config
        .expand()
        .context("Configuration is invalid")?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&config_file.config)?),
        _ => {
            if config_file.is_from_file() {
                println!("# Configuration from: {}", config_file.path.display());
            } else {
                println!("# No configuration file found, showing defaults");
            }
            println!();
            print!(
                "{}",
                toml::to_string_pretty(&config_file.config)
                    .context("Failed to serialize configuration")?
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert!(config.ssh.enabled);
        assert!(config.ssh.allowed_keys.is_empty());
        assert!(config.expand().is_ok());
    }
}
