//! Path expansion utilities

use std::path::PathBuf;

/// Application directory name under the user's home
const APP_DIR: &str = ".agentbox";

/// Expand environment variables and tilde in a path string
pub fn expand_path(path: &str) -> crate::Result<String> {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .map_err(|e| crate::Error::Config(format!("Failed to expand path '{}': {}", path, e)))
}

/// Expand path and convert to PathBuf
pub fn expand_to_pathbuf(path: &str) -> crate::Result<PathBuf> {
    expand_path(path).map(PathBuf::from)
}

/// Shared area holding the per-proxy socket directories.
///
/// `~/.agentbox/sockets`, or `<tmp>/agentbox-sockets` when there is no home
/// directory.
pub fn default_sockets_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(APP_DIR).join("sockets"),
        None => std::env::temp_dir().join("agentbox-sockets"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_tilde() {
        let result = expand_path("~/test").unwrap();
        assert!(result.ends_with("/test"));
        assert!(!result.contains('~'));
    }

    #[test]
    fn test_expand_path_env_var() {
        let home = std::env::var("HOME").unwrap();
        let result = expand_path("$HOME/sockets").unwrap();
        assert_eq!(result, format!("{}/sockets", home));
    }

    #[test]
    fn test_expand_path_unknown_var() {
        let result = expand_path("$AGENTBOX_SURELY_UNSET_VAR/x");
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_expand_to_pathbuf() {
        let result = expand_to_pathbuf("/tmp/agent.sock").unwrap();
        assert_eq!(result, PathBuf::from("/tmp/agent.sock"));
    }

    #[test]
    fn test_default_sockets_dir() {
        assert!(default_sockets_dir().to_string_lossy().ends_with("sockets"));
    }
}
