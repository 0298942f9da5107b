//! Upstream SSH agent connection
//!
//! The upstream is the host's real agent, typically the socket named by
//! `SSH_AUTH_SOCK`.

use crate::error::{Error, Result};
use crate::protocol::{AgentCodec, AgentMessage, Identity, parse_identities};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, trace};

/// Default timeout for dialing the upstream agent and for proxy-initiated
/// round-trips
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection factory for the upstream SSH agent
#[derive(Debug, Clone)]
pub struct Upstream {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Upstream {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Override the dial and round-trip timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dial the upstream agent. No retries.
    pub async fn connect(&self) -> Result<UnixStream> {
        let stream = tokio::time::timeout(
            self.timeout,
            UnixStream::connect(&self.socket_path),
        )
        .await
        .map_err(|_| {
            Error::Transport(format!(
                "Connection to upstream agent at {} timed out after {:?}",
                self.socket_path.display(),
                self.timeout
            ))
        })?
        .map_err(|e| {
            Error::Transport(format!(
                "Failed to connect to upstream agent at {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        trace!(socket_path = %self.socket_path.display(), "Connected to upstream agent");
        Ok(stream)
    }

    /// One REQUEST_IDENTITIES round-trip on a fresh connection
    ///
    /// The whole exchange is bounded by the upstream timeout, so an agent
    /// that accepts but never answers cannot stall the caller.
    pub async fn request_identities(&self) -> Result<Vec<Identity>> {
        let exchange = self.exchange_identities();
        let identities = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                Error::Transport(format!(
                    "Upstream agent at {} did not answer REQUEST_IDENTITIES within {:?}",
                    self.socket_path.display(),
                    self.timeout
                ))
            })??;
        debug!(count = identities.len(), "Fetched identities from upstream");
        Ok(identities)
    }

    async fn exchange_identities(&self) -> Result<Vec<Identity>> {
        let mut stream = self.connect().await?;
        let (mut reader, mut writer) = stream.split();

        AgentCodec::write(&mut writer, &AgentMessage::RequestIdentities).await?;

        let response = AgentCodec::read(&mut reader).await?.ok_or_else(|| {
            Error::Protocol("Upstream agent closed connection unexpectedly".to_string())
        })?;

        match response {
            AgentMessage::IdentitiesAnswer(payload) => Ok(parse_identities(&payload)),
            other => Err(Error::Protocol(format!(
                "Unexpected response type {} to REQUEST_IDENTITIES",
                other.type_byte()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_identities_answer;
    use bytes::Bytes;
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    #[test]
    fn test_upstream_new() {
        let upstream = Upstream::new("/tmp/test.sock");
        assert_eq!(upstream.socket_path(), Path::new("/tmp/test.sock"));
        assert_eq!(upstream.timeout(), DEFAULT_UPSTREAM_TIMEOUT);

        let upstream = upstream.with_timeout(Duration::from_millis(250));
        assert_eq!(upstream.timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_connect_nonexistent_socket() {
        let dir = tempdir().unwrap();
        let upstream = Upstream::new(dir.path().join("missing.sock"));
        let result = upstream.connect().await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_request_identities_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = stream.split();
            let request = AgentCodec::read(&mut reader).await.unwrap().unwrap();
            assert_eq!(request, AgentMessage::RequestIdentities);
            let answer = build_identities_answer(&[Identity::new(
                Bytes::from_static(b"b1"),
                "laptop-key",
            )]);
            AgentCodec::write_frame(&mut writer, &answer).await.unwrap();
        });

        let identities = Upstream::new(&path).request_identities().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].comment(), "laptop-key");
    }

    #[tokio::test]
    async fn test_request_identities_failure_response() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (mut reader, mut writer) = stream.split();
            let _ = AgentCodec::read(&mut reader).await;
            AgentCodec::write(&mut writer, &AgentMessage::failure())
                .await
                .unwrap();
        });

        let result = Upstream::new(&path).request_identities().await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_request_identities_times_out_on_silent_agent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();

        // Accepts and reads, never answers
        let silent = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (mut reader, _writer) = stream.split();
            let _ = AgentCodec::read(&mut reader).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let upstream = Upstream::new(&path).with_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let result = upstream.request_identities().await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        silent.abort();
    }
}
