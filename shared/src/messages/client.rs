use minicbor::{Decode, Encode};

use crate::constants::{ClientVersion, ProtocolVersion};
use crate::invalidation::Invalidation;
use crate::messages::common::RegistrationUpdate;
use crate::messages::error::MessageError;
use crate::types::ClientType;

/// Categories of client-to-server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum ClientMessageType {
    /// Request assignment of a client id (and an initial session).
    #[n(0)]
    Initialize,
    /// Request a fresh session for an already-assigned client id.
    #[n(1)]
    UpdateSession,
    /// Registrations, acknowledgments, heartbeats and polls.
    #[n(2)]
    ObjectControl,
    /// The client is going away for good.
    #[n(3)]
    Shutdown,
}

/// Secondary action riding on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum ClientAction {
    #[n(0)]
    AssignClientId,
    #[n(1)]
    UpdateSession,
    #[n(2)]
    Heartbeat,
    #[n(3)]
    PollInvalidations,
}

/// A message from the client to the invalidation service.
///
/// Built up incrementally by the session, registration, and network layers;
/// every field starts absent and the network manager's finalize step stamps
/// the id/version/timestamp fields last.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
#[cbor(map)]
pub struct ClientToServerMessage {
    #[n(0)]
    pub message_type: Option<ClientMessageType>,
    #[n(1)]
    pub client_type: Option<ClientType>,
    #[n(2)]
    #[cbor(with = "minicbor::bytes")]
    pub app_client_id: Option<Vec<u8>>,
    #[n(3)]
    pub nonce: Option<i64>,
    #[n(4)]
    #[cbor(with = "minicbor::bytes")]
    pub client_uniquifier: Option<Vec<u8>>,
    #[n(5)]
    #[cbor(with = "minicbor::bytes")]
    pub session_token: Option<Vec<u8>>,
    #[n(6)]
    pub action: Option<ClientAction>,
    #[n(7)]
    pub register_operations: Vec<RegistrationUpdate>,
    #[n(8)]
    pub acked_invalidations: Vec<Invalidation>,
    #[n(9)]
    pub message_id: Option<String>,
    #[n(10)]
    pub protocol_version: Option<ProtocolVersion>,
    #[n(11)]
    pub client_version: Option<ClientVersion>,
    #[n(12)]
    pub timestamp_ms: Option<i64>,
}

impl ClientToServerMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&self) -> Vec<u8> {
        minicbor::to_vec(self).expect("encoding to an in-memory buffer cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(minicbor::decode(bytes)?)
    }
}
