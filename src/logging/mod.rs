//! Logging for agentbox-ssh-proxy
//!
//! Human-readable diagnostics go through `tracing` to stderr. Allow/deny
//! decisions are additionally recorded as JSONL through an [`AuditLog`].

pub mod jsonl;

pub use jsonl::{Decision, JsonlWriter, LogEvent, LogEventKind};

use std::path::Path;
use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Verbosity level adjustment: -1 for quiet, 0 for normal, +1 for verbose
    pub verbosity: i8,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the global `--verbose` / `--quiet` flags
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        let verbosity = if quiet {
            -1
        } else if verbose {
            1
        } else {
            0
        };
        Self { verbosity }
    }

    pub fn verbose(mut self) -> Self {
        self.verbosity = 1;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.verbosity = -1;
        self
    }

    fn min_level(&self) -> Level {
        match self.verbosity {
            v if v < 0 => Level::WARN,
            0 => Level::INFO,
            _ => Level::DEBUG,
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the level chosen by the flags.
pub fn init(config: &LogConfig) -> Result<(), SetGlobalDefaultError> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.min_level().into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

    tracing::subscriber::set_global_default(subscriber)
}

/// Sink for allow/deny audit events.
///
/// Without a JSONL file every call is a no-op, so the proxy can record
/// unconditionally.
#[derive(Default)]
pub struct AuditLog {
    writer: Option<JsonlWriter>,
}

impl AuditLog {
    /// An audit log that discards events
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Append audit events to the JSONL file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        Ok(Self {
            writer: Some(JsonlWriter::new(path)?),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Record an event; write failures are logged, never propagated
    pub fn record(&self, event: LogEvent) {
        if let Some(writer) = &self.writer
            && let Err(e) = writer.write(&event)
        {
            tracing::warn!(error = %e, kind = %event.kind, "Failed to write audit event");
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_config_levels() {
        assert_eq!(LogConfig::new().min_level(), Level::INFO);
        assert_eq!(LogConfig::new().verbose().min_level(), Level::DEBUG);
        assert_eq!(LogConfig::new().quiet().min_level(), Level::WARN);
    }

    #[test]
    fn test_log_config_from_flags() {
        assert_eq!(LogConfig::from_flags(true, false).verbosity, 1);
        assert_eq!(LogConfig::from_flags(false, true).verbosity, -1);
        assert_eq!(LogConfig::from_flags(false, false).verbosity, 0);
    }

    #[test]
    fn test_disabled_audit_log_is_noop() {
        let audit = AuditLog::disabled();
        assert!(!audit.is_enabled());
        audit.record(LogEvent::client_connect(1));
    }

    #[test]
    fn test_audit_log_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");

        let audit = AuditLog::open(&path).unwrap();
        audit.record(LogEvent::sign_request(3, "laptop-key", Decision::Allowed));
        drop(audit);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"decision\":\"allowed\""));
    }
}
