//! JSONL (JSON Lines) audit log
//!
//! Each decision the proxy makes is written as a single JSON object on one
//! line. Events carry key comments and types only, never key material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Log event kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogEventKind {
    /// Proxy listener bound and accepting
    ProxyStart,
    /// Proxy stopped accepting
    ProxyStop,
    ClientConnect,
    ClientDisconnect,
    /// Key kept in a filtered identity listing
    KeyAllowed,
    /// Key removed from a filtered identity listing
    KeyFiltered,
    /// Sign request decided (see `decision`)
    SignRequest,
    Error,
}

impl std::fmt::Display for LogEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogEventKind::ProxyStart => write!(f, "proxy_start"),
            LogEventKind::ProxyStop => write!(f, "proxy_stop"),
            LogEventKind::ClientConnect => write!(f, "client_connect"),
            LogEventKind::ClientDisconnect => write!(f, "client_disconnect"),
            LogEventKind::KeyAllowed => write!(f, "key_allowed"),
            LogEventKind::KeyFiltered => write!(f, "key_filtered"),
            LogEventKind::SignRequest => write!(f, "sign_request"),
            LogEventKind::Error => write!(f, "error"),
        }
    }
}

/// Decision result for sign requests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Decision::Allowed
        } else {
            Decision::Denied
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allowed => write!(f, "allowed"),
            Decision::Denied => write!(f, "denied"),
        }
    }
}

/// A structured audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub kind: LogEventKind,

    /// Listening endpoint (socket path or `tcp:<port>`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u64>,

    /// SSH key comment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// SSH key type (e.g., "ssh-ed25519")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Allow-list entry that matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEvent {
    /// Create a new log event with the current timestamp
    pub fn new(kind: LogEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            endpoint: None,
            client_id: None,
            comment: None,
            key_type: None,
            decision: None,
            reason: None,
            matched_rule: None,
            error: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_client_id(mut self, id: u64) -> Self {
        self.client_id = Some(id);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_key_type(mut self, key_type: Option<String>) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_matched_rule(mut self, rule: Option<String>) -> Self {
        self.matched_rule = rule;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn proxy_start(endpoint: impl Into<String>) -> Self {
        Self::new(LogEventKind::ProxyStart).with_endpoint(endpoint)
    }

    pub fn proxy_stop(endpoint: impl Into<String>) -> Self {
        Self::new(LogEventKind::ProxyStop).with_endpoint(endpoint)
    }

    pub fn client_connect(client_id: u64) -> Self {
        Self::new(LogEventKind::ClientConnect).with_client_id(client_id)
    }

    pub fn client_disconnect(client_id: u64) -> Self {
        Self::new(LogEventKind::ClientDisconnect).with_client_id(client_id)
    }

    /// A key kept in, or removed from, an identity listing
    pub fn key_listed(client_id: u64, comment: impl Into<String>, allowed: bool) -> Self {
        let kind = if allowed {
            LogEventKind::KeyAllowed
        } else {
            LogEventKind::KeyFiltered
        };
        Self::new(kind)
            .with_client_id(client_id)
            .with_comment(comment)
            .with_decision(Decision::from_allowed(allowed))
    }

    pub fn sign_request(client_id: u64, comment: impl Into<String>, decision: Decision) -> Self {
        Self::new(LogEventKind::SignRequest)
            .with_client_id(client_id)
            .with_comment(comment)
            .with_decision(decision)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogEventKind::Error).with_error(message)
    }

    /// Serialize the event to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// JSONL file writer with thread-safe buffered output
pub struct JsonlWriter {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlWriter {
    /// Open `path` for appending, creating it (and its parent) if needed
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Write a log event to the file
    pub fn write(&self, event: &LogEvent) -> std::io::Result<()> {
        let json = event
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Flush any buffered data to the file
    pub fn flush(&self) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writer.flush()
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
