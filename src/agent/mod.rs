//! SSH agent proxy
//!
//! - `Upstream`: connection factory for the host's SSH agent
//! - `FilterState`: allow-list plus the decisions cached per key blob
//! - `ConnectionProxy`: filters one client connection in both directions
//! - `ProxyServer`: listener lifecycle (Unix socket or TCP)

mod server;
mod session;
mod state;
mod upstream;

pub use server::{ProxyOptions, ProxyServer, Transport};
pub use session::ConnectionProxy;
pub use state::{FilterState, SignDecision};
pub use upstream::Upstream;
