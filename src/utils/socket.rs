//! Unix socket directory management
//!
//! Each Unix-socket proxy lives in its own owner-only directory under a
//! shared sockets area, next to a `pid` marker naming the owning process.
//! The marker lets [`cleanup_orphaned_dirs`] remove directories left behind
//! by processes that died without running their cleanup.

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Prefix of per-proxy directories inside the sockets area
pub const PROXY_DIR_PREFIX: &str = "ssh-proxy-";

/// Name of the PID marker file inside a proxy directory
pub const PID_FILE_NAME: &str = "pid";

/// Name of the listening socket inside a proxy directory
pub const SOCKET_FILE_NAME: &str = "agent.sock";

/// Error type for socket operations
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDirError { path: String, source: io::Error },

    #[error("Failed to write PID marker at {path}: {source}")]
    PidFileError { path: String, source: io::Error },

    #[error("Failed to set permissions on {path}: {source}")]
    PermissionError { path: String, source: io::Error },
}

/// Ensure the sockets area exists, creating it owner-only if missing.
pub fn ensure_dir(path: &Path) -> Result<(), SocketError> {
    if path.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|e| SocketError::CreateDirError {
            path: path.display().to_string(),
            source: e,
        })
}

/// Create a fresh owner-only (0700) proxy directory inside `base`.
///
/// The directory is removed when the returned [`TempDir`] is closed or
/// dropped.
pub fn create_proxy_dir(base: &Path) -> Result<TempDir, SocketError> {
    ensure_dir(base)?;

    let dir = tempfile::Builder::new()
        .prefix(PROXY_DIR_PREFIX)
        .tempdir_in(base)
        .map_err(|e| SocketError::CreateDirError {
            path: base.display().to_string(),
            source: e,
        })?;

    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700)).map_err(|e| {
        SocketError::PermissionError {
            path: dir.path().display().to_string(),
            source: e,
        }
    })?;

    Ok(dir)
}

/// Write the current process id into `<dir>/pid`.
pub fn write_pid_marker(dir: &Path) -> Result<PathBuf, SocketError> {
    let path = dir.join(PID_FILE_NAME);
    fs::write(&path, std::process::id().to_string()).map_err(|e| SocketError::PidFileError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(path)
}

/// Set socket permissions to owner read/write only (0600).
///
/// This should be called immediately after binding a Unix socket
/// to ensure only the owner can connect.
pub fn set_socket_permissions(path: &Path) -> Result<(), SocketError> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
        SocketError::PermissionError {
            path: path.display().to_string(),
            source: e,
        }
    })
}

/// Check whether a process with the given PID is alive.
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Read the PID marker of a proxy directory
fn read_pid_marker(dir: &Path) -> Option<u32> {
    fs::read_to_string(dir.join(PID_FILE_NAME))
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Remove proxy directories whose owning process no longer exists.
///
/// Directories without a readable PID marker are left alone. Returns the
/// number of directories removed.
pub fn cleanup_orphaned_dirs(base: &Path) -> usize {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %base.display(), error = %e, "Cannot read sockets directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(PROXY_DIR_PREFIX) {
            continue;
        }
        let path = entry.path();
        let Some(pid) = read_pid_marker(&path) else {
            continue;
        };
        if process_exists(pid) {
            debug!(path = %path.display(), pid, "Proxy directory still owned by a live process");
            continue;
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(path = %path.display(), pid, "Removed orphaned proxy directory");
                removed += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove orphaned proxy directory")
            }
        }
    }
    removed
}
