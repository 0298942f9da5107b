//! Per-connection proxying
//!
//! Each accepted client gets a [`ConnectionProxy`]: it dials the upstream
//! agent and runs one pump per direction. The client→upstream pump vets sign
//! requests; the upstream→client pump filters identity listings. When either
//! direction ends, the other is dropped and both sockets close.
//!
//! The agent protocol has no request ids: a client pairs each reply with its
//! requests by order. A denied sign request is answered locally, so the
//! proxy tracks which replies are still owed and releases a local FAILURE
//! only once every earlier upstream reply has been written.

use crate::error::Result;
use crate::logging::{AuditLog, Decision, LogEvent};
use crate::protocol::{
    AgentCodec, AgentMessage, build_identities_answer, parse_identities, sign_request_key,
};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::{FilterState, Upstream};

/// Placeholder used in logs for keys that never appeared in a listing
const UNKNOWN_KEY: &str = "<unlisted key>";

/// Source of a reply the client is still owed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    /// Forwarded request; the upstream agent answers
    Upstream,
    /// Denied request; the proxy answers with FAILURE
    Failure,
}

/// Client write half and the replies still owed, in request order
struct ClientSide<W> {
    writer: W,
    pending: VecDeque<Reply>,
}

impl<W: AsyncWrite + Unpin> ClientSide<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            pending: VecDeque::new(),
        }
    }

    /// Answer a denied request, after any upstream replies owed before it
    async fn deny(&mut self) -> Result<()> {
        self.pending.push_back(Reply::Failure);
        self.flush_failures().await
    }

    /// Write one upstream reply, then any failures that were waiting on it
    async fn reply(&mut self, body: &Bytes) -> Result<()> {
        if self.pending.front() == Some(&Reply::Upstream) {
            self.pending.pop_front();
        }
        AgentCodec::write_frame(&mut self.writer, body).await?;
        self.flush_failures().await
    }

    async fn flush_failures(&mut self) -> Result<()> {
        while self.pending.front() == Some(&Reply::Failure) {
            self.pending.pop_front();
            AgentCodec::write(&mut self.writer, &AgentMessage::failure()).await?;
        }
        Ok(())
    }
}

/// Proxy for one client connection
pub struct ConnectionProxy {
    client_id: u64,
    upstream: Arc<Upstream>,
    state: Arc<FilterState>,
    audit: Arc<AuditLog>,
}

impl ConnectionProxy {
    pub fn new(
        client_id: u64,
        upstream: Arc<Upstream>,
        state: Arc<FilterState>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            client_id,
            upstream,
            state,
            audit,
        }
    }

    /// Serve one client until either side closes.
    ///
    /// A failed upstream dial drops the client immediately.
    pub async fn run<S>(self, client: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let upstream = match self.upstream.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(client_id = self.client_id, error = %e, "Dropping client: upstream agent unreachable");
                self.audit
                    .record(LogEvent::error(e.to_string()).with_client_id(self.client_id));
                return Err(e);
            }
        };

        debug!(client_id = self.client_id, "Client connected");
        self.audit.record(LogEvent::client_connect(self.client_id));

        let (client_reader, client_writer) = tokio::io::split(client);
        let (upstream_reader, upstream_writer) = upstream.into_split();
        // Both pumps answer the client: upstream replies and synthesized failures
        let client_writer = Mutex::new(ClientSide::new(client_writer));

        let result = tokio::select! {
            r = self.pump_client_to_upstream(client_reader, upstream_writer, &client_writer) => r,
            r = self.pump_upstream_to_client(upstream_reader, &client_writer) => r,
        };

        debug!(client_id = self.client_id, "Client disconnected");
        self.audit.record(LogEvent::client_disconnect(self.client_id));
        result
    }

    async fn pump_client_to_upstream<R, U, W>(
        &self,
        mut client: R,
        mut upstream: U,
        client_writer: &Mutex<ClientSide<W>>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        U: AsyncWrite + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(body) = AgentCodec::read_frame(&mut client).await? {
            let forward = match AgentMessage::decode(&body)? {
                AgentMessage::SignRequest(payload) => self.authorize_sign_request(&payload),
                msg => {
                    trace!(client_id = self.client_id, msg_type = msg.type_byte(), "Forwarding request");
                    true
                }
            };

            if forward {
                // Owed before the request leaves, so the reply always finds it
                client_writer.lock().await.pending.push_back(Reply::Upstream);
                AgentCodec::write_frame(&mut upstream, &body).await?;
            } else {
                client_writer.lock().await.deny().await?;
            }
        }
        trace!(client_id = self.client_id, "Client closed connection");
        Ok(())
    }

    async fn pump_upstream_to_client<U, W>(
        &self,
        mut upstream: U,
        client_writer: &Mutex<ClientSide<W>>,
    ) -> Result<()>
    where
        U: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(body) = AgentCodec::read_frame(&mut upstream).await? {
            let outgoing = match AgentMessage::decode(&body)? {
                AgentMessage::IdentitiesAnswer(payload) => self.filter_identities(&payload),
                msg => {
                    trace!(client_id = self.client_id, msg_type = msg.type_byte(), "Forwarding response");
                    body
                }
            };
            client_writer.lock().await.reply(&outgoing).await?;
        }
        trace!(client_id = self.client_id, "Upstream closed connection");
        Ok(())
    }

    /// Rebuild an IDENTITIES_ANSWER with only the allowed keys, recording
    /// the decision for every key seen.
    fn filter_identities(&self, payload: &Bytes) -> Bytes {
        let identities = parse_identities(payload);
        let decisions = self.state.observe(&identities);

        for (identity, allowed) in identities.iter().zip(&decisions) {
            if *allowed {
                debug!(client_id = self.client_id, comment = %identity.comment(), "Key allowed");
            } else {
                debug!(client_id = self.client_id, comment = %identity.comment(), "Key filtered");
            }
            let matched = self
                .state
                .allow_list()
                .matching_entry(identity)
                .map(|e| e.description());
            self.audit.record(
                LogEvent::key_listed(self.client_id, identity.comment(), *allowed)
                    .with_key_type(identity.key_type())
                    .with_matched_rule(matched),
            );
        }

        let original_count = identities.len();
        let allowed: Vec<_> = identities
            .into_iter()
            .zip(decisions)
            .filter_map(|(identity, allowed)| allowed.then_some(identity))
            .collect();

        info!(
            client_id = self.client_id,
            original = original_count,
            filtered = allowed.len(),
            "Filtered identities"
        );

        build_identities_answer(&allowed)
    }

    /// Decide whether a sign request may reach the upstream agent
    fn authorize_sign_request(&self, payload: &Bytes) -> bool {
        let blob = match sign_request_key(payload) {
            Ok(blob) => blob,
            Err(e) => {
                if self.state.allow_list().is_empty() {
                    return true;
                }
                warn!(client_id = self.client_id, error = %e, "Sign request denied: unparseable request");
                self.audit.record(
                    LogEvent::sign_request(self.client_id, UNKNOWN_KEY, Decision::Denied)
                        .with_reason(e.to_string()),
                );
                return false;
            }
        };

        let decision = self.state.sign_decision(&blob);
        let comment = decision.comment.as_deref().unwrap_or(UNKNOWN_KEY);

        if decision.allowed {
            info!(client_id = self.client_id, comment = %comment, "Sign request allowed");
            self.audit.record(LogEvent::sign_request(
                self.client_id,
                comment,
                Decision::Allowed,
            ));
        } else {
            warn!(client_id = self.client_id, comment = %comment, "Sign request denied: key not allowed");
            self.audit.record(
                LogEvent::sign_request(self.client_id, comment, Decision::Denied)
                    .with_reason("no allow-list entry matched"),
            );
        }
        decision.allowed
    }
}
