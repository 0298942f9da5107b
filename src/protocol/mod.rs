//! SSH Agent Protocol implementation
//!
//! Only the subset the filtering proxy needs is interpreted; see
//! https://datatracker.ietf.org/doc/html/draft-miller-ssh-agent

pub mod codec;
pub mod message;

pub use codec::{AgentCodec, MAX_FRAME_SIZE};
pub use message::{
    AgentMessage, Identity, MessageType, build_identities_answer, parse_identities,
    sign_request_key,
};
