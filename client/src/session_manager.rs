//! Client-id and session lifecycle management.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{info, warn};

use ticl_shared::{
    ClientAction, ClientMessageType, ClientToServerMessage, ClientType, ServerMessageType,
    ServerToClientMessage, StatusCode,
};

/// States of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No server-assigned identity yet; the next request asks for one.
    NoClientId,
    /// We hold a client id but no live session token.
    HaveClientIdNoSession,
    /// A live session: object-control traffic may flow.
    HaveSession,
    /// The application shut the client down for good.
    Shutdown,
}

/// What the orchestrator should do with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    /// The message carries nothing useful: malformed, stale, or addressed to
    /// someone else.
    IgnoreMessage,
    /// We acquired a session from this message. Registrations must be
    /// re-asserted.
    AcquireSession,
    /// The server repudiated our client id.
    LoseClientId,
    /// The server expired our session.
    LoseSession,
    /// The message's session matches ours; process its object-control
    /// content.
    ProcessObjectControl,
}

/// Maximum consecutive unanswered session requests before backing off.
const MAX_SESSION_ATTEMPTS: u32 = 5;

/// How long after giving up before session requests resume.
const WAKE_UP_AFTER_GIVE_UP: Duration = Duration::from_secs(3 * 60 * 60);

/// Owns the client uniquifier and session token, classifies inbound messages
/// into a fixed set of actions, and emits the session-layer part of outbound
/// messages.
///
/// Not internally synchronized; the orchestrator serializes access.
pub struct SessionManager {
    client_type: ClientType,
    app_client_id: Vec<u8>,
    /// Minimum spacing between session requests.
    registration_timeout: Duration,
    /// Nonce to match a client-id assignment response, set while one is
    /// expected.
    nonce: Option<i64>,
    /// When we last sent a request for a client id or session.
    last_send_time: Option<SystemTime>,
    session_attempt_count: u32,
    uniquifier: Vec<u8>,
    session_token: Vec<u8>,
    shutdown: bool,
    shutdown_sent: bool,
}

impl SessionManager {
    pub fn new(
        client_type: ClientType,
        app_client_id: Vec<u8>,
        registration_timeout: Duration,
        uniquifier: Vec<u8>,
        session_token: Vec<u8>,
    ) -> Self {
        Self {
            client_type,
            app_client_id,
            registration_timeout,
            nonce: None,
            last_send_time: None,
            session_attempt_count: 0,
            uniquifier,
            session_token,
            shutdown: false,
            shutdown_sent: false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.shutdown {
            SessionState::Shutdown
        } else if self.uniquifier.is_empty() {
            SessionState::NoClientId
        } else if self.session_token.is_empty() {
            SessionState::HaveClientIdNoSession
        } else {
            SessionState::HaveSession
        }
    }

    pub fn client_uniquifier(&self) -> &[u8] {
        &self.uniquifier
    }

    pub fn session_token(&self) -> &[u8] {
        &self.session_token
    }

    pub fn has_session(&self) -> bool {
        !self.session_token.is_empty()
    }

    /// Marks the client as permanently shut down; the next outbound message
    /// will be a shutdown notice.
    pub fn shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Returns whether the session layer needs to put something on the wire:
    /// a pending shutdown notice, or a client-id/session request when we have
    /// none — rate-limited, and giving up after too many unanswered attempts
    /// until a long quiet period has passed.
    pub fn has_data_to_send(&mut self, now: SystemTime) -> bool {
        if self.shutdown {
            return !self.shutdown_sent;
        }
        if let Some(last_send) = self.last_send_time {
            if now > last_send + WAKE_UP_AFTER_GIVE_UP {
                self.session_attempt_count = 0;
            }
        }
        if self.has_session() {
            return false;
        }
        let resend_allowed = match self.last_send_time {
            Some(last_send) => now > last_send + self.registration_timeout,
            None => true,
        };
        resend_allowed && self.session_attempt_count < MAX_SESSION_ATTEMPTS
    }

    /// Adds the session-layer action to an outbound message. When a session
    /// is live this only stamps the identity fields, leaving the message type
    /// unset for the registration layer to fill in.
    pub fn add_session_action(&mut self, message: &mut ClientToServerMessage, now: SystemTime) {
        if self.shutdown {
            message.message_type = Some(ClientMessageType::Shutdown);
            message.client_uniquifier = Some(self.uniquifier.clone());
            message.session_token = Some(self.session_token.clone());
            self.shutdown_sent = true;
            return;
        }
        if self.uniquifier.is_empty() {
            // Request a client id, with a nonce to match the reply against.
            let nonce = *self.nonce.get_or_insert_with(|| epoch_micros(now));
            message.message_type = Some(ClientMessageType::Initialize);
            message.client_type = Some(self.client_type);
            message.app_client_id = Some(self.app_client_id.clone());
            message.nonce = Some(nonce);
            message.action = Some(ClientAction::AssignClientId);
            self.last_send_time = Some(now);
            self.session_attempt_count += 1;
            return;
        }
        if self.session_token.is_empty() {
            message.message_type = Some(ClientMessageType::UpdateSession);
            message.client_uniquifier = Some(self.uniquifier.clone());
            message.action = Some(ClientAction::UpdateSession);
            self.last_send_time = Some(now);
            self.session_attempt_count += 1;
            return;
        }
        message.client_uniquifier = Some(self.uniquifier.clone());
        message.session_token = Some(self.session_token.clone());
    }

    /// Classifies an inbound message and applies any session-state changes it
    /// implies.
    pub fn process_message(&mut self, message: &ServerToClientMessage) -> MessageAction {
        if self.shutdown {
            return MessageAction::IgnoreMessage;
        }

        let Some(message_type) = message.message_type else {
            warn!("ignoring message with no type");
            return MessageAction::IgnoreMessage;
        };

        if let Some(version) = &message.protocol_version {
            if !version.is_supported() {
                warn!("ignoring message with unsupported version {:?}", version);
                return MessageAction::IgnoreMessage;
            }
        }

        match message_type {
            ServerMessageType::AssignClientId => self.process_assign_client_id(message),
            ServerMessageType::UpdateSession => self.process_update_session(message),
            ServerMessageType::InvalidateClientId => self.process_invalidate_client_id(message),
            ServerMessageType::InvalidateSession => self.process_invalidate_session(message),
            ServerMessageType::ObjectControl => self.check_object_control_message(message),
        }
    }

    /// Drops any client id and session we may hold, so the next request
    /// starts the assignment handshake over.
    pub fn forget_client_id(&mut self) {
        self.uniquifier.clear();
        self.session_token.clear();
        self.nonce = None;
        self.last_send_time = None;
        self.session_attempt_count = 0;
    }

    fn process_assign_client_id(&mut self, message: &ServerToClientMessage) -> MessageAction {
        if !message.is_success() {
            warn!("ignoring assign-client-id message with non-success status");
            return MessageAction::IgnoreMessage;
        }
        if !self.uniquifier.is_empty() {
            info!("ignoring assign-client-id message: already have an id");
            return MessageAction::IgnoreMessage;
        }
        let Some(our_nonce) = self.nonce else {
            info!("ignoring assign-client-id message: no assignment expected");
            return MessageAction::IgnoreMessage;
        };
        if message.nonce != Some(our_nonce) {
            info!(
                "ignoring assign-client-id message with non-matching nonce: {:?} vs {}",
                message.nonce, our_nonce
            );
            return MessageAction::IgnoreMessage;
        }
        let (Some(uniquifier), Some(session_token)) =
            (&message.client_uniquifier, &message.session_token)
        else {
            warn!("ignoring purported assign-client-id with a missing id or session");
            return MessageAction::IgnoreMessage;
        };
        if uniquifier.is_empty() || session_token.is_empty() {
            warn!("ignoring purported assign-client-id with an empty id or session");
            return MessageAction::IgnoreMessage;
        }
        let client_type_matches = message.client_type == Some(self.client_type);
        let app_client_id_matches =
            message.app_client_id.as_deref() == Some(self.app_client_id.as_slice());
        if !(client_type_matches && app_client_id_matches) {
            info!("ignoring assign-client-id message addressed to another application");
            return MessageAction::IgnoreMessage;
        }

        info!("accepting client id assignment");
        self.uniquifier = uniquifier.clone();
        self.session_token = session_token.clone();
        self.nonce = None;
        self.session_attempt_count = 0;
        MessageAction::AcquireSession
    }

    fn process_update_session(&mut self, message: &ServerToClientMessage) -> MessageAction {
        if !message.is_success() {
            warn!("ignoring update-session message with non-success status");
            return MessageAction::IgnoreMessage;
        }
        if self.uniquifier.is_empty() {
            info!("ignoring update-session: no client id to attach it to");
            return MessageAction::IgnoreMessage;
        }
        let Some(session_token) = &message.session_token else {
            warn!("ignoring purported update-session with no session token");
            return MessageAction::IgnoreMessage;
        };
        if session_token.is_empty() {
            warn!("ignoring purported update-session with an empty session token");
            return MessageAction::IgnoreMessage;
        }
        if message.client_uniquifier.as_deref() == Some(self.uniquifier.as_slice()) {
            info!("accepting new session");
            self.session_token = session_token.clone();
            self.session_attempt_count = 0;
            MessageAction::AcquireSession
        } else {
            info!("ignoring update-session with a mismatched client id");
            MessageAction::IgnoreMessage
        }
    }

    fn process_invalidate_client_id(&mut self, message: &ServerToClientMessage) -> MessageAction {
        let code = message.status.as_ref().map(|status| status.code);
        if code != Some(StatusCode::UnknownClient) {
            warn!("ignoring invalidate-client-id message without unknown-client status");
            return MessageAction::IgnoreMessage;
        }
        if self.uniquifier.is_empty() {
            info!("ignoring invalidate-client-id: no client id to invalidate");
            return MessageAction::IgnoreMessage;
        }
        if message.client_uniquifier.as_deref() == Some(self.uniquifier.as_slice()) {
            info!("client id repudiated by the server");
            MessageAction::LoseClientId
        } else {
            info!("ignoring invalidate-client-id with a mismatched client id");
            MessageAction::IgnoreMessage
        }
    }

    fn process_invalidate_session(&mut self, message: &ServerToClientMessage) -> MessageAction {
        let code = message.status.as_ref().map(|status| status.code);
        if code != Some(StatusCode::InvalidSession) {
            warn!("ignoring invalidate-session message without invalid-session status");
            return MessageAction::IgnoreMessage;
        }
        if self.session_token.is_empty() {
            info!("ignoring invalidate-session: no session to invalidate");
            return MessageAction::IgnoreMessage;
        }
        if message.session_token.as_deref() == Some(self.session_token.as_slice()) {
            info!("session expired by the server");
            self.session_token.clear();
            self.last_send_time = None;
            self.session_attempt_count = 0;
            MessageAction::LoseSession
        } else {
            info!("ignoring invalidate-session with a mismatched token");
            MessageAction::IgnoreMessage
        }
    }

    fn check_object_control_message(&self, message: &ServerToClientMessage) -> MessageAction {
        if !message.is_success() {
            warn!("ignoring object-control message with non-success status");
            return MessageAction::IgnoreMessage;
        }
        if self.session_token.is_empty() || self.uniquifier.is_empty() {
            info!("ignoring object-control message: no live session");
            return MessageAction::IgnoreMessage;
        }
        if message.session_token.as_deref() == Some(self.session_token.as_slice()) {
            MessageAction::ProcessObjectControl
        } else {
            info!("ignoring object-control message with a mismatched token");
            MessageAction::IgnoreMessage
        }
    }
}

fn epoch_micros(now: SystemTime) -> i64 {
    now.duration_since(UNIX_EPOCH)
        .map(|since| since.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticl_shared::Status;

    const CLIENT_TYPE: ClientType = ClientType(3);

    fn fresh_manager() -> SessionManager {
        SessionManager::new(
            CLIENT_TYPE,
            b"app".to_vec(),
            Duration::from_secs(60),
            Vec::new(),
            Vec::new(),
        )
    }

    fn manager_with_session() -> SessionManager {
        SessionManager::new(
            CLIENT_TYPE,
            b"app".to_vec(),
            Duration::from_secs(60),
            b"uniq".to_vec(),
            b"token".to_vec(),
        )
    }

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    fn assignment_reply(manager_nonce: i64) -> ServerToClientMessage {
        let mut reply = ServerToClientMessage::new();
        reply.message_type = Some(ServerMessageType::AssignClientId);
        reply.status = Some(Status::success());
        reply.nonce = Some(manager_nonce);
        reply.client_uniquifier = Some(b"uniq".to_vec());
        reply.session_token = Some(b"token".to_vec());
        reply.client_type = Some(CLIENT_TYPE);
        reply.app_client_id = Some(b"app".to_vec());
        reply
    }

    fn sent_initialize(manager: &mut SessionManager) -> ClientToServerMessage {
        let mut message = ClientToServerMessage::new();
        manager.add_session_action(&mut message, now());
        assert_eq!(message.message_type, Some(ClientMessageType::Initialize));
        message
    }

    #[test]
    fn fresh_start_requests_client_id() {
        let mut manager = fresh_manager();
        assert_eq!(manager.state(), SessionState::NoClientId);
        assert!(manager.has_data_to_send(now()));

        let message = sent_initialize(&mut manager);
        assert_eq!(message.client_type, Some(CLIENT_TYPE));
        assert_eq!(message.app_client_id.as_deref(), Some(b"app".as_slice()));
        assert!(message.nonce.is_some());
        assert_eq!(message.action, Some(ClientAction::AssignClientId));
    }

    #[test]
    fn matching_assignment_acquires_session() {
        let mut manager = fresh_manager();
        let message = sent_initialize(&mut manager);
        let reply = assignment_reply(message.nonce.unwrap());

        assert_eq!(manager.process_message(&reply), MessageAction::AcquireSession);
        assert_eq!(manager.state(), SessionState::HaveSession);
        assert_eq!(manager.client_uniquifier(), b"uniq");
        assert_eq!(manager.session_token(), b"token");
    }

    #[test]
    fn assignment_with_wrong_nonce_is_ignored() {
        let mut manager = fresh_manager();
        let message = sent_initialize(&mut manager);
        let mut reply = assignment_reply(message.nonce.unwrap());
        reply.nonce = Some(message.nonce.unwrap() + 1);

        assert_eq!(manager.process_message(&reply), MessageAction::IgnoreMessage);
        assert_eq!(manager.state(), SessionState::NoClientId);
    }

    #[test]
    fn unsolicited_assignment_is_ignored() {
        let mut manager = fresh_manager();
        // No Initialize sent, so no nonce outstanding.
        let reply = assignment_reply(42);
        assert_eq!(manager.process_message(&reply), MessageAction::IgnoreMessage);
    }

    #[test]
    fn assignment_for_another_application_is_ignored() {
        let mut manager = fresh_manager();
        let message = sent_initialize(&mut manager);
        let mut reply = assignment_reply(message.nonce.unwrap());
        reply.app_client_id = Some(b"other-app".to_vec());
        assert_eq!(manager.process_message(&reply), MessageAction::IgnoreMessage);
    }

    #[test]
    fn update_session_grants_session_for_current_id() {
        let mut manager = SessionManager::new(
            CLIENT_TYPE,
            b"app".to_vec(),
            Duration::from_secs(60),
            b"uniq".to_vec(),
            Vec::new(),
        );
        assert_eq!(manager.state(), SessionState::HaveClientIdNoSession);

        let mut request = ClientToServerMessage::new();
        manager.add_session_action(&mut request, now());
        assert_eq!(request.message_type, Some(ClientMessageType::UpdateSession));
        assert_eq!(request.client_uniquifier.as_deref(), Some(b"uniq".as_slice()));

        let mut reply = ServerToClientMessage::new();
        reply.message_type = Some(ServerMessageType::UpdateSession);
        reply.status = Some(Status::success());
        reply.client_uniquifier = Some(b"uniq".to_vec());
        reply.session_token = Some(b"token-2".to_vec());
        assert_eq!(manager.process_message(&reply), MessageAction::AcquireSession);
        assert_eq!(manager.session_token(), b"token-2");
    }

    #[test]
    fn object_control_with_matching_token_is_processed() {
        let mut manager = manager_with_session();
        let mut bundle = ServerToClientMessage::new();
        bundle.message_type = Some(ServerMessageType::ObjectControl);
        bundle.status = Some(Status::success());
        bundle.session_token = Some(b"token".to_vec());
        assert_eq!(
            manager.process_message(&bundle),
            MessageAction::ProcessObjectControl
        );
        assert_eq!(manager.state(), SessionState::HaveSession);
    }

    #[test]
    fn object_control_with_mismatched_token_is_ignored() {
        let mut manager = manager_with_session();
        let mut bundle = ServerToClientMessage::new();
        bundle.message_type = Some(ServerMessageType::ObjectControl);
        bundle.status = Some(Status::success());
        bundle.session_token = Some(b"stale-token".to_vec());
        assert_eq!(manager.process_message(&bundle), MessageAction::IgnoreMessage);
    }

    #[test]
    fn invalidate_session_drops_token_but_keeps_id() {
        let mut manager = manager_with_session();
        let mut notice = ServerToClientMessage::new();
        notice.message_type = Some(ServerMessageType::InvalidateSession);
        notice.status = Some(Status::new(StatusCode::InvalidSession, "expired"));
        notice.session_token = Some(b"token".to_vec());

        assert_eq!(manager.process_message(&notice), MessageAction::LoseSession);
        assert_eq!(manager.state(), SessionState::HaveClientIdNoSession);
        assert_eq!(manager.client_uniquifier(), b"uniq");
    }

    #[test]
    fn invalidate_session_requires_invalid_session_status() {
        let mut manager = manager_with_session();
        let mut notice = ServerToClientMessage::new();
        notice.message_type = Some(ServerMessageType::InvalidateSession);
        notice.status = Some(Status::success());
        notice.session_token = Some(b"token".to_vec());
        assert_eq!(manager.process_message(&notice), MessageAction::IgnoreMessage);
    }

    #[test]
    fn invalidate_client_id_classifies_as_lose_client_id() {
        let mut manager = manager_with_session();
        let mut notice = ServerToClientMessage::new();
        notice.message_type = Some(ServerMessageType::InvalidateClientId);
        notice.status = Some(Status::new(StatusCode::UnknownClient, "gone"));
        notice.client_uniquifier = Some(b"uniq".to_vec());
        assert_eq!(manager.process_message(&notice), MessageAction::LoseClientId);
    }

    #[test]
    fn invalidate_client_id_for_someone_else_is_ignored() {
        let mut manager = manager_with_session();
        let mut notice = ServerToClientMessage::new();
        notice.message_type = Some(ServerMessageType::InvalidateClientId);
        notice.status = Some(Status::new(StatusCode::UnknownClient, "gone"));
        notice.client_uniquifier = Some(b"other".to_vec());
        assert_eq!(manager.process_message(&notice), MessageAction::IgnoreMessage);
    }

    #[test]
    fn message_with_no_type_is_ignored() {
        let mut manager = manager_with_session();
        let bundle = ServerToClientMessage::new();
        assert_eq!(manager.process_message(&bundle), MessageAction::IgnoreMessage);
    }

    #[test]
    fn unsupported_protocol_version_is_ignored() {
        let mut manager = manager_with_session();
        let mut bundle = ServerToClientMessage::new();
        bundle.message_type = Some(ServerMessageType::ObjectControl);
        bundle.status = Some(Status::success());
        bundle.session_token = Some(b"token".to_vec());
        bundle.protocol_version = Some(ticl_shared::ProtocolVersion { major: 99, minor: 0 });
        assert_eq!(manager.process_message(&bundle), MessageAction::IgnoreMessage);
    }

    #[test]
    fn session_requests_are_rate_limited() {
        let mut manager = fresh_manager();
        let start = now();
        assert!(manager.has_data_to_send(start));
        let mut message = ClientToServerMessage::new();
        manager.add_session_action(&mut message, start);

        // Immediately afterwards the resend gate is closed.
        assert!(!manager.has_data_to_send(start + Duration::from_secs(1)));
        // Once the timeout passes it reopens.
        assert!(manager.has_data_to_send(start + Duration::from_secs(61)));
    }

    #[test]
    fn session_requests_give_up_after_max_attempts() {
        let mut manager = fresh_manager();
        let mut time = now();
        for _ in 0..5 {
            assert!(manager.has_data_to_send(time));
            let mut message = ClientToServerMessage::new();
            manager.add_session_action(&mut message, time);
            time += Duration::from_secs(120);
        }
        // Five unanswered attempts: give up for a while.
        assert!(!manager.has_data_to_send(time));
        // After a long quiet period the client tries again.
        assert!(manager.has_data_to_send(time + WAKE_UP_AFTER_GIVE_UP + Duration::from_secs(1)));
    }

    #[test]
    fn repeated_initialize_requests_reuse_the_nonce() {
        let mut manager = fresh_manager();
        let first = sent_initialize(&mut manager);
        let second = sent_initialize(&mut manager);
        assert_eq!(first.nonce, second.nonce);
    }

    #[test]
    fn shutdown_emits_one_shutdown_message() {
        let mut manager = manager_with_session();
        manager.shutdown();
        assert_eq!(manager.state(), SessionState::Shutdown);
        assert!(manager.has_data_to_send(now()));

        let mut message = ClientToServerMessage::new();
        manager.add_session_action(&mut message, now());
        assert_eq!(message.message_type, Some(ClientMessageType::Shutdown));
        assert_eq!(message.client_uniquifier.as_deref(), Some(b"uniq".as_slice()));

        // The notice went out; nothing further to send.
        assert!(!manager.has_data_to_send(now()));
    }

    #[test]
    fn inbound_messages_after_shutdown_are_ignored() {
        let mut manager = manager_with_session();
        manager.shutdown();
        let mut bundle = ServerToClientMessage::new();
        bundle.message_type = Some(ServerMessageType::ObjectControl);
        bundle.status = Some(Status::success());
        bundle.session_token = Some(b"token".to_vec());
        assert_eq!(manager.process_message(&bundle), MessageAction::IgnoreMessage);
    }

    #[test]
    fn forget_client_id_resets_to_no_client_id() {
        let mut manager = manager_with_session();
        manager.forget_client_id();
        assert_eq!(manager.state(), SessionState::NoClientId);
        assert!(manager.client_uniquifier().is_empty());
        assert!(manager.has_data_to_send(now()));
    }
}
