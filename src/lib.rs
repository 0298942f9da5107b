//! agentbox-ssh-proxy - filtering SSH agent proxy for sandboxed containers
//!
//! The proxy sits between the host's SSH agent and a container. The container
//! only sees, and can only sign with, the keys named by an allow-list. Private
//! key material never leaves the host agent.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod protocol;
pub mod utils;

pub use error::{Error, Result};

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
pub const NAME: &str = env!("CARGO_PKG_NAME");
