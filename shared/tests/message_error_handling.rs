/// Integration tests for wire-message error handling.
///
/// Message decoding is the first thing done to bytes received from the
/// network, so it must fail cleanly on anything malformed rather than panic.

use ticl_shared::{
    ClientMessageType, ClientToServerMessage, MessageError, ServerMessageType,
    ServerToClientMessage, Status,
};

// ========== Malformed input ==========

#[test]
fn server_message_decode_empty_buffer_fails() {
    let result = ServerToClientMessage::decode(&[]);
    assert!(matches!(result, Err(MessageError::Decode(_))));
}

#[test]
fn client_message_decode_empty_buffer_fails() {
    let result = ClientToServerMessage::decode(&[]);
    assert!(matches!(result, Err(MessageError::Decode(_))));
}

#[test]
fn server_message_decode_truncated_data_does_not_panic() {
    let mut message = ServerToClientMessage::new();
    message.message_type = Some(ServerMessageType::ObjectControl);
    message.status = Some(Status::success());
    message.session_token = Some(b"token".to_vec());

    let bytes = message.encode();
    for len in 0..bytes.len() {
        // Must not panic; may or may not decode depending on where the cut
        // lands.
        let _ = ServerToClientMessage::decode(&bytes[..len]);
    }
}

#[test]
fn server_message_decode_single_byte_variations_do_not_panic() {
    for byte in 0u8..=255 {
        let _ = ServerToClientMessage::decode(&[byte]);
    }
}

#[test]
fn client_message_decode_garbage_does_not_panic() {
    let _ = ClientToServerMessage::decode(&[0xff, 0xfe, 0xfd, 0xfc]);
    let _ = ClientToServerMessage::decode(&[0x00, 0x00, 0x00, 0x00]);
}

// ========== Error type ergonomics ==========

#[test]
fn message_error_displays_cause() {
    let error = ServerToClientMessage::decode(&[]).unwrap_err();
    let text = format!("{}", error);
    assert!(text.contains("failed to decode message"));
}

#[test]
fn message_error_is_debug() {
    let error = ServerToClientMessage::decode(&[]).unwrap_err();
    let text = format!("{:?}", error);
    assert!(!text.is_empty());
}

// ========== Cross-type confusion ==========

#[test]
fn client_message_bytes_do_not_decode_as_matching_server_message() {
    // The two message layouts share field indices, so decoding one as the
    // other may succeed structurally; the type fields must not alias.
    let mut message = ClientToServerMessage::new();
    message.message_type = Some(ClientMessageType::Shutdown);
    let bytes = message.encode();

    if let Ok(decoded) = ServerToClientMessage::decode(&bytes) {
        assert_ne!(decoded.message_type, Some(ServerMessageType::ObjectControl));
    }
}
