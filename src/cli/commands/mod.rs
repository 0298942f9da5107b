//! Command implementations for agentbox-ssh-proxy CLI

pub mod cleanup;
pub mod config;
pub mod run;
pub mod version;
