use minicbor::{Decode, Encode};

use crate::constants::ProtocolVersion;
use crate::invalidation::Invalidation;
use crate::messages::common::{RegistrationUpdateResult, Status};
use crate::messages::error::MessageError;
use crate::types::ClientType;

/// Categories of server-to-client messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum ServerMessageType {
    /// Grants a client id and an initial session.
    #[n(0)]
    AssignClientId,
    /// Grants a fresh session token for an existing client id.
    #[n(1)]
    UpdateSession,
    /// Repudiates the client id named in the message.
    #[n(2)]
    InvalidateClientId,
    /// Expires the session token named in the message.
    #[n(3)]
    InvalidateSession,
    /// Invalidations and registration results for the current session.
    #[n(4)]
    ObjectControl,
}

/// A message from the invalidation service to the client.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
#[cbor(map)]
pub struct ServerToClientMessage {
    #[n(0)]
    pub message_type: Option<ServerMessageType>,
    #[n(1)]
    pub status: Option<Status>,
    #[n(2)]
    pub nonce: Option<i64>,
    #[n(3)]
    #[cbor(with = "minicbor::bytes")]
    pub client_uniquifier: Option<Vec<u8>>,
    #[n(4)]
    #[cbor(with = "minicbor::bytes")]
    pub session_token: Option<Vec<u8>>,
    #[n(5)]
    pub client_type: Option<ClientType>,
    #[n(6)]
    #[cbor(with = "minicbor::bytes")]
    pub app_client_id: Option<Vec<u8>>,
    #[n(7)]
    pub registration_results: Vec<RegistrationUpdateResult>,
    #[n(8)]
    pub invalidations: Vec<Invalidation>,
    /// How long the client should wait between heartbeats from now on.
    /// Non-positive values are ignored.
    #[n(9)]
    pub next_heartbeat_interval_ms: Option<i64>,
    /// How long the client should wait between invalidation polls from now
    /// on. Non-positive values are ignored.
    #[n(10)]
    pub next_poll_interval_ms: Option<i64>,
    #[n(11)]
    pub protocol_version: Option<ProtocolVersion>,
}

impl ServerToClientMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&self) -> Vec<u8> {
        minicbor::to_vec(self).expect("encoding to an in-memory buffer cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(minicbor::decode(bytes)?)
    }

    /// The status code, treating an absent status as non-success.
    pub fn is_success(&self) -> bool {
        self.status.as_ref().is_some_and(Status::is_success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::Invalidation;
    use crate::messages::common::StatusCode;
    use crate::types::{ObjectId, ObjectSource};

    #[test]
    fn round_trips_an_object_control_message() {
        let mut message = ServerToClientMessage::new();
        message.message_type = Some(ServerMessageType::ObjectControl);
        message.status = Some(Status::success());
        message.session_token = Some(b"token".to_vec());
        message
            .invalidations
            .push(Invalidation::new(ObjectId::new(ObjectSource(4), "widget"), 42).with_payload("fresh"));
        message.next_heartbeat_interval_ms = Some(120_000);

        let decoded = ServerToClientMessage::decode(&message.encode()).expect("decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn absent_status_is_not_success() {
        let message = ServerToClientMessage::new();
        assert!(!message.is_success());
    }

    #[test]
    fn non_success_status_is_reported() {
        let mut message = ServerToClientMessage::new();
        message.status = Some(Status::new(StatusCode::UnknownClient, "who?"));
        assert!(!message.is_success());
    }
}
