//! SSH Agent Protocol message types and parsing

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ssh_key::{Fingerprint, HashAlg, PublicKey};

/// SSH Agent message type bytes the proxy interprets.
///
/// Every other type byte is carried through as [`AgentMessage::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Failure = 5,
    RequestIdentities = 11,
    IdentitiesAnswer = 12,
    SignRequest = 13,
    SignResponse = 14,
}

impl MessageType {
    /// Map a wire type byte to a known message type
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            5 => Some(MessageType::Failure),
            11 => Some(MessageType::RequestIdentities),
            12 => Some(MessageType::IdentitiesAnswer),
            13 => Some(MessageType::SignRequest),
            14 => Some(MessageType::SignResponse),
            _ => None,
        }
    }

    /// Get the message type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Failure => "SSH_AGENT_FAILURE",
            MessageType::RequestIdentities => "SSH_AGENTC_REQUEST_IDENTITIES",
            MessageType::IdentitiesAnswer => "SSH_AGENT_IDENTITIES_ANSWER",
            MessageType::SignRequest => "SSH_AGENTC_SIGN_REQUEST",
            MessageType::SignResponse => "SSH_AGENT_SIGN_RESPONSE",
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

/// An SSH key identity as listed by the agent
#[derive(Debug, Clone)]
pub struct Identity {
    /// Raw public key blob, the canonical identifier of the key
    pub blob: Bytes,
    /// Comment exactly as sent on the wire; it need not be UTF-8
    raw_comment: Bytes,
    /// Lossy UTF-8 view of the comment for matching and logging
    comment: String,
    /// Parsed public key (if the blob is a key ssh-key understands)
    public_key: Option<PublicKey>,
}

impl Identity {
    pub fn new(blob: Bytes, comment: impl Into<String>) -> Self {
        let comment = comment.into();
        Self::with_public_key(blob, Bytes::from(comment.clone()), comment)
    }

    /// Build from the wire form, keeping the comment bytes verbatim
    pub fn from_wire(blob: Bytes, raw_comment: Bytes) -> Self {
        let comment = String::from_utf8_lossy(&raw_comment).into_owned();
        Self::with_public_key(blob, raw_comment, comment)
    }

    fn with_public_key(blob: Bytes, raw_comment: Bytes, comment: String) -> Self {
        let public_key = PublicKey::from_bytes(&blob).ok();
        Self {
            blob,
            raw_comment,
            comment,
            public_key,
        }
    }

    /// Comment as text; invalid UTF-8 sequences are replaced
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Comment bytes as received
    pub fn comment_bytes(&self) -> &Bytes {
        &self.raw_comment
    }

    /// SHA-256 fingerprint of the key, in OpenSSH `SHA256:...` form
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.public_key
            .as_ref()
            .map(|k| k.fingerprint(HashAlg::Sha256))
    }

    /// Key algorithm name, e.g. `ssh-ed25519`
    pub fn key_type(&self) -> Option<String> {
        self.public_key
            .as_ref()
            .map(|k| k.algorithm().as_str().to_string())
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.blob == other.blob && self.raw_comment == other.raw_comment
    }
}

impl Eq for Identity {}

/// A decoded agent frame body.
///
/// Decoded once per frame so the pumps match on the kind instead of
/// re-inspecting the type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    RequestIdentities,
    /// Payload after the type byte: `count` then `(blob, comment)` records
    IdentitiesAnswer(Bytes),
    /// Payload after the type byte: `(blob, data, flags)`
    SignRequest(Bytes),
    SignResponse(Bytes),
    Failure,
    /// Any type byte the proxy does not interpret, with its payload
    Other(u8, Bytes),
}

impl AgentMessage {
    /// Create a failure response
    pub fn failure() -> Self {
        AgentMessage::Failure
    }

    /// Decode a frame body (type byte followed by payload)
    pub fn decode(body: &Bytes) -> Result<Self> {
        let Some(&type_byte) = body.first() else {
            return Err(Error::InvalidMessage("Empty message".to_string()));
        };
        let payload = body.slice(1..);

        Ok(match MessageType::from_byte(type_byte) {
            Some(MessageType::RequestIdentities) => AgentMessage::RequestIdentities,
            Some(MessageType::IdentitiesAnswer) => AgentMessage::IdentitiesAnswer(payload),
            Some(MessageType::SignRequest) => AgentMessage::SignRequest(payload),
            Some(MessageType::SignResponse) => AgentMessage::SignResponse(payload),
            Some(MessageType::Failure) => AgentMessage::Failure,
            None => AgentMessage::Other(type_byte, payload),
        })
    }

    /// Encode to a frame body (type byte followed by payload, no length prefix)
    pub fn encode(&self) -> Bytes {
        let (type_byte, payload): (u8, Option<&Bytes>) = match self {
            AgentMessage::RequestIdentities => (MessageType::RequestIdentities.into(), None),
            AgentMessage::IdentitiesAnswer(p) => (MessageType::IdentitiesAnswer.into(), Some(p)),
            AgentMessage::SignRequest(p) => (MessageType::SignRequest.into(), Some(p)),
            AgentMessage::SignResponse(p) => (MessageType::SignResponse.into(), Some(p)),
            AgentMessage::Failure => (MessageType::Failure.into(), None),
            AgentMessage::Other(t, p) => (*t, Some(p)),
        };

        let payload_len = payload.map_or(0, |p| p.len());
        let mut buf = BytesMut::with_capacity(1 + payload_len);
        buf.put_u8(type_byte);
        if let Some(p) = payload {
            buf.put_slice(p);
        }
        buf.freeze()
    }

    /// Wire type byte of this message
    pub fn type_byte(&self) -> u8 {
        match self {
            AgentMessage::RequestIdentities => MessageType::RequestIdentities.into(),
            AgentMessage::IdentitiesAnswer(_) => MessageType::IdentitiesAnswer.into(),
            AgentMessage::SignRequest(_) => MessageType::SignRequest.into(),
            AgentMessage::SignResponse(_) => MessageType::SignResponse.into(),
            AgentMessage::Failure => MessageType::Failure.into(),
            AgentMessage::Other(t, _) => *t,
        }
    }
}

/// Read one `u32`-length-prefixed string from `buf`, advancing `offset`.
fn read_string(payload: &Bytes, offset: &mut usize) -> Option<Bytes> {
    let mut rest = payload.get(*offset..)?;
    if rest.remaining() < 4 {
        return None;
    }
    let len = usize::try_from(rest.get_u32()).ok()?;
    let start = *offset + 4;
    let end = start.checked_add(len)?;
    if end > payload.len() {
        return None;
    }
    *offset = end;
    Some(payload.slice(start..end))
}

/// Parse the identities out of an IDENTITIES_ANSWER payload.
///
/// Never fails: on the first length inconsistency the identities decoded so
/// far are returned and the rest of the payload is ignored.
pub fn parse_identities(payload: &Bytes) -> Vec<Identity> {
    let mut offset = 0;
    let count = match payload.get(..4) {
        Some(mut head) => head.get_u32(),
        None => return Vec::new(),
    };
    offset += 4;

    // Each record needs at least 8 bytes of length prefixes
    let plausible = (payload.len() - offset) / 8;
    let mut identities = Vec::with_capacity((count as usize).min(plausible));

    for _ in 0..count {
        let Some(blob) = read_string(payload, &mut offset) else {
            break;
        };
        let Some(comment) = read_string(payload, &mut offset) else {
            break;
        };
        identities.push(Identity::from_wire(blob, comment));
    }

    identities
}

/// Build a complete IDENTITIES_ANSWER frame body from a list of identities.
///
/// Exact inverse of [`parse_identities`]; order is preserved.
pub fn build_identities_answer(identities: &[Identity]) -> Bytes {
    let len: usize = identities
        .iter()
        .map(|i| 8 + i.blob.len() + i.raw_comment.len())
        .sum();
    let mut buf = BytesMut::with_capacity(5 + len);
    buf.put_u8(MessageType::IdentitiesAnswer.into());
    buf.put_u32(identities.len() as u32);

    for identity in identities {
        buf.put_u32(identity.blob.len() as u32);
        buf.put_slice(&identity.blob);
        buf.put_u32(identity.raw_comment.len() as u32);
        buf.put_slice(&identity.raw_comment);
    }

    buf.freeze()
}

/// Extract the key blob a SIGN_REQUEST payload targets.
///
/// Only the leading `(blobLen, blob)` is read; the data to be signed is
/// left untouched.
pub fn sign_request_key(payload: &Bytes) -> Result<Bytes> {
    if payload.len() < 4 {
        return Err(Error::InvalidMessage("Message too short".to_string()));
    }
    let mut offset = 0;
    read_string(payload, &mut offset)
        .ok_or_else(|| Error::InvalidMessage("Key blob truncated".to_string()))
}
