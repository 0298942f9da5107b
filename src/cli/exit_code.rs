//! Exit code definitions for agentbox-ssh-proxy
//!
//! Provides standardized exit codes for different error conditions.

use crate::Error;

/// Exit codes for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Configuration error (invalid config, missing required settings)
    ConfigError = 2,
    /// Socket error (cannot create/bind socket, permission denied)
    SocketError = 3,
}

impl ExitCode {
    /// Pick the exit code for a command failure
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.chain().find_map(|e| e.downcast_ref::<Error>()) {
            Some(Error::Config(_)) | Some(Error::TomlParse(_)) => ExitCode::ConfigError,
            Some(Error::Socket(_)) | Some(Error::Transport(_)) => ExitCode::SocketError,
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ExitCode> for u8 {
    fn from(code: ExitCode) -> Self {
        code as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_for_error() {
        let config = anyhow::Error::new(Error::Config("bad".into()));
        assert_eq!(ExitCode::for_error(&config), ExitCode::ConfigError);

        let bind: anyhow::Result<()> = Err(Error::Transport("Failed to bind".into()).into());
        let bind = bind.context("Failed to start proxy").unwrap_err();
        assert_eq!(ExitCode::for_error(&bind), ExitCode::SocketError);

        let other = anyhow::anyhow!("boom");
        assert_eq!(ExitCode::for_error(&other), ExitCode::GeneralError);
        assert_eq!(u8::from(ExitCode::Success), 0);
    }
}
