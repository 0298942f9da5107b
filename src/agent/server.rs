//! Proxy server lifecycle
//!
//! A [`ProxyServer`] owns the listening transport (a Unix socket in a private
//! directory, or a TCP port for runtimes that cannot reach host sockets) and
//! spawns a [`ConnectionProxy`] per accepted client.

use crate::error::{Error, Result};
use crate::filter::AllowList;
use crate::logging::{AuditLog, LogEvent};
use crate::utils::socket::{
    SOCKET_FILE_NAME, create_proxy_dir, set_socket_permissions, write_pid_marker,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::upstream::DEFAULT_UPSTREAM_TIMEOUT;
use super::{ConnectionProxy, FilterState, Upstream};

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Where the proxy listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Unix socket in a fresh private directory under `sockets_dir`
    Unix { sockets_dir: PathBuf },
    /// TCP on all interfaces with an OS-assigned port. Containers reach the
    /// host through a gateway address, so loopback-only would be unreachable.
    Tcp,
}

/// Construction parameters for a [`ProxyServer`]
#[derive(Debug)]
pub struct ProxyOptions {
    /// Path to the host's SSH agent socket
    pub upstream: PathBuf,
    pub allow_list: AllowList,
    pub transport: Transport,
    pub audit: Arc<AuditLog>,
    /// Bound on dialing the upstream and on proxy-initiated round-trips
    pub upstream_timeout: Duration,
}

impl ProxyOptions {
    pub fn new(upstream: impl Into<PathBuf>, allow_list: AllowList, transport: Transport) -> Self {
        Self {
            upstream: upstream.into(),
            allow_list,
            transport,
            audit: Arc::new(AuditLog::disabled()),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }
}

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

enum ClientStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Listener {
    async fn accept(&self) -> std::io::Result<ClientStream> {
        match self {
            Listener::Unix(l) => l.accept().await.map(|(s, _)| ClientStream::Unix(s)),
            Listener::Tcp(l) => l.accept().await.map(|(s, addr)| {
                trace!(peer = %addr, "Accepted TCP client");
                ClientStream::Tcp(s)
            }),
        }
    }
}

/// Everything a connection task needs, cloned per accept
#[derive(Clone)]
struct SessionContext {
    upstream: Arc<Upstream>,
    state: Arc<FilterState>,
    audit: Arc<AuditLog>,
    next_client_id: Arc<AtomicU64>,
}

impl SessionContext {
    fn spawn(&self, stream: ClientStream) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let proxy = ConnectionProxy::new(
            client_id,
            Arc::clone(&self.upstream),
            Arc::clone(&self.state),
            Arc::clone(&self.audit),
        );

        tokio::spawn(async move {
            let result = match stream {
                ClientStream::Unix(s) => proxy.run(s).await,
                ClientStream::Tcp(s) => {
                    let _ = s.set_nodelay(true);
                    proxy.run(s).await
                }
            };
            if let Err(e) = result {
                // Connection errors are expected (client disconnect, etc.)
                debug!(client_id, error = %e, "Connection handler error");
            }
        });
    }
}

/// Filtering SSH agent proxy
pub struct ProxyServer {
    upstream: Arc<Upstream>,
    transport: Transport,
    state: Arc<FilterState>,
    audit: Arc<AuditLog>,
    next_client_id: Arc<AtomicU64>,
    socket_dir: Option<TempDir>,
    socket_path: Option<PathBuf>,
    tcp_port: Option<u16>,
    shutdown_tx: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
}

impl ProxyServer {
    /// Validate options. Nothing is created on disk or bound until
    /// [`start`](Self::start).
    pub fn new(options: ProxyOptions) -> Result<Self> {
        if options.upstream.as_os_str().is_empty() {
            return Err(Error::Config(
                "Upstream SSH agent socket path is required".to_string(),
            ));
        }
        if let Transport::Unix { sockets_dir } = &options.transport {
            if sockets_dir.as_os_str().is_empty() {
                return Err(Error::Config("Sockets directory is required".to_string()));
            }
        }

        Ok(Self {
            upstream: Arc::new(
                Upstream::new(&options.upstream).with_timeout(options.upstream_timeout),
            ),
            transport: options.transport,
            state: Arc::new(FilterState::new(options.allow_list)),
            audit: options.audit,
            next_client_id: Arc::new(AtomicU64::new(1)),
            socket_dir: None,
            socket_path: None,
            tcp_port: None,
            shutdown_tx: None,
            accept_task: None,
        })
    }

    /// Socket path to mount into the container (Unix transport, while running)
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Port the container should dial (TCP transport, while running)
    pub fn tcp_port(&self) -> Option<u16> {
        self.tcp_port
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn allow_list(&self) -> &AllowList {
        self.state.allow_list()
    }

    /// Human-readable listening endpoint
    pub fn endpoint(&self) -> String {
        match (&self.socket_path, self.tcp_port) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(port)) => format!("tcp:{}", port),
            (None, None) => "<not started>".to_string(),
        }
    }

    /// Bind the transport, warm the key cache and start accepting.
    ///
    /// Calling `start` on a running proxy does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.state.is_running() {
            debug!(endpoint = %self.endpoint(), "Proxy already running");
            return Ok(());
        }

        let listener = self.bind().await?;
        self.warm_cache().await;

        self.state.set_running(true);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = SessionContext {
            upstream: Arc::clone(&self.upstream),
            state: Arc::clone(&self.state),
            audit: Arc::clone(&self.audit),
            next_client_id: Arc::clone(&self.next_client_id),
        };
        self.accept_task = Some(tokio::spawn(accept_loop(listener, shutdown_rx, ctx)));
        self.shutdown_tx = Some(shutdown_tx);

        info!(
            endpoint = %self.endpoint(),
            upstream = %self.upstream.socket_path().display(),
            upstream_timeout = ?self.upstream.timeout(),
            filters = ?self.allow_list().descriptions(),
            "SSH agent proxy listening"
        );
        self.audit.record(LogEvent::proxy_start(self.endpoint()));
        Ok(())
    }

    /// Stop accepting and release the transport.
    ///
    /// Connections already being served are left to finish on their own.
    /// Calling `stop` more than once is harmless.
    pub fn stop(&mut self) {
        if !self.state.set_running(false) {
            return;
        }
        let endpoint = self.endpoint();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        // The accept loop drops the listener when it sees the signal
        self.accept_task.take();

        if let Some(dir) = self.socket_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove proxy socket directory");
            } else {
                debug!(path = %path.display(), "Removed proxy socket directory");
            }
        }
        self.socket_path = None;
        self.tcp_port = None;

        info!(endpoint = %endpoint, "SSH agent proxy stopped");
        self.audit.record(LogEvent::proxy_stop(endpoint));
    }

    async fn bind(&mut self) -> Result<Listener> {
        match &self.transport {
            Transport::Unix { sockets_dir } => {
                let dir = create_proxy_dir(sockets_dir)?;
                write_pid_marker(dir.path())?;

                let socket_path = dir.path().join(SOCKET_FILE_NAME);
                let listener = UnixListener::bind(&socket_path).map_err(|e| {
                    Error::Transport(format!(
                        "Failed to bind to socket at {}: {}",
                        socket_path.display(),
                        e
                    ))
                })?;
                // The enclosing 0700 directory already keeps other users out
                // until the socket itself is narrowed.
                set_socket_permissions(&socket_path)?;

                self.socket_dir = Some(dir);
                self.socket_path = Some(socket_path);
                Ok(Listener::Unix(listener))
            }
            Transport::Tcp => {
                let listener = TcpListener::bind(("0.0.0.0", 0))
                    .await
                    .map_err(|e| Error::Transport(format!("Failed to bind TCP listener: {}", e)))?;
                let port = listener.local_addr()?.port();

                self.tcp_port = Some(port);
                Ok(Listener::Tcp(listener))
            }
        }
    }

    /// Record decisions for the upstream's current keys so sign requests
    /// from clients that skip the listing are still judged by comment.
    async fn warm_cache(&self) {
        match self.upstream.request_identities().await {
            Ok(identities) => {
                let decisions = self.state.observe(&identities);
                let allowed = decisions.iter().filter(|a| **a).count();
                debug!(
                    total = identities.len(),
                    allowed, "Pre-populated key cache from upstream"
                );
            }
            Err(e) => {
                warn!(error = %e, "Could not pre-populate key cache; continuing without it");
            }
        }
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: Listener,
    mut shutdown_rx: watch::Receiver<bool>,
    ctx: SessionContext,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            accepted = listener.accept() => match accepted {
                Ok(stream) => ctx.spawn(stream),
                Err(e) => {
                    if !ctx.state.is_running() {
                        break;
                    }
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    debug!("Accept loop exited");
}
