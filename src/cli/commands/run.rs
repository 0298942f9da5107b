//! Run command - execute the proxy in the foreground

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use crate::agent::{ProxyOptions, ProxyServer, Transport};
use crate::cli::args::RunArgs;
use crate::config::{Config, ConfigFile, ExpandedConfig, TransportKind};
use crate::logging::AuditLog;
use crate::utils::socket::cleanup_orphaned_dirs;

/// Apply command-line overrides on top of the file configuration
fn apply_overrides(mut config: Config, args: &RunArgs) -> Config {
    if let Some(upstream) = &args.upstream {
        config.upstream = upstream.to_string_lossy().into_owned();
    }
    if !args.allow.is_empty() {
        config.ssh.allowed_keys = args.allow.clone();
    }
    if args.tcp {
        config.ssh.transport = TransportKind::Tcp;
    }
    if let Some(dir) = &args.sockets_dir {
        config.sockets_dir = Some(dir.to_string_lossy().into_owned());
    }
    if let Some(log) = &args.log {
        config.log_path = Some(log.to_string_lossy().into_owned());
    }
    config
}

/// Resolve the effective settings for this run
pub fn resolve(args: &RunArgs, config_path: Option<PathBuf>) -> Result<ExpandedConfig> {
    let config_file =
        ConfigFile::load(config_path.as_deref()).context("Failed to load configuration")?;
    if config_file.is_from_file() {
        info!(path = %config_file.path.display(), "Using configuration file");
    }

    apply_overrides(config_file.config, args)
        .expand()
        .context("Invalid configuration")
}

/// Execute the run command
pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let settings = resolve(&args, config_path)?;
    if let Some(reason) = settings.proxy_disabled_reason() {
        bail!("Not starting SSH agent proxy: {}", reason);
    }

    if !settings.upstream.exists() {
        warn!(
            upstream = %settings.upstream.display(),
            "Upstream SSH agent socket does not exist yet; clients will be dropped until it does"
        );
    }

    let transport = match settings.transport {
        TransportKind::Unix => {
            let removed = cleanup_orphaned_dirs(&settings.sockets_dir);
            if removed > 0 {
                info!(removed, "Removed orphaned proxy directories");
            }
            Transport::Unix {
                sockets_dir: settings.sockets_dir.clone(),
            }
        }
        TransportKind::Tcp => Transport::Tcp,
    };

    let audit = match &settings.log_path {
        Some(path) => {
            let audit = AuditLog::open(path)
                .with_context(|| format!("Failed to open audit log {}", path.display()))?;
            info!(log = %path.display(), "JSONL audit logging enabled");
            audit
        }
        None => AuditLog::disabled(),
    };

    let options = ProxyOptions::new(&settings.upstream, settings.allow_list.clone(), transport)
        .with_audit(Arc::new(audit));
    let server = ProxyServer::new(options).context("Invalid proxy options")?;

    // Release the socket directory on every exit path
    let mut server = scopeguard::guard(server, |mut server| server.stop());
    server
        .start()
        .await
        .context("Failed to start SSH agent proxy")?;

    if let Some(path) = server.socket_path() {
        println!("SSH_AUTH_SOCK={}", path.display());
    } else if let Some(port) = server.tcp_port() {
        println!("SSH_AGENT_PROXY_PORT={}", port);
    }

    info!("Proxy started. Press Ctrl+C to stop.");

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Received shutdown signal, stopping...");
    Ok(())
}
