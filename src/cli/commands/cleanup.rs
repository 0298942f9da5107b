//! Cleanup command - remove socket directories of dead proxies

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli::args::CleanupArgs;
use crate::config::ConfigFile;
use crate::utils::socket::cleanup_orphaned_dirs;

/// Execute the cleanup command
pub async fn execute(args: CleanupArgs, config_path: Option<PathBuf>) -> Result<()> {
    let sockets_dir = match args.sockets_dir {
        Some(dir) => dir,
        None => {
            let config_file =
                ConfigFile::load(config_path.as_deref()).context("Failed to load configuration")?;
            config_file
                .config
                .expand()
                .context("Invalid configuration")?
                .sockets_dir
        }
    };

    let removed = cleanup_orphaned_dirs(&sockets_dir);
    println!(
        "Removed {} orphaned proxy director{} from {}",
        removed,
        if removed == 1 { "y" } else { "ies" },
        sockets_dir.display()
    );
    Ok(())
}
