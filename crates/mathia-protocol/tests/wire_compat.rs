// Verify the wire format matches what chat clients expect.
// These tests ensure protocol compatibility is never broken.

use mathia_core::types::MessageFlags;
use mathia_protocol::{close, ClientCommand, MessageView, PresenceStatus, ServerFrame};

#[test]
fn new_message_command_parses() {
    let json = r#"{"command":"new_message","chatid":"room-1","message":"hello","idempotency_key":"k-1"}"#;
    let cmd: ClientCommand = serde_json::from_str(json).unwrap();

    match cmd {
        ClientCommand::NewMessage {
            chatid,
            message,
            idempotency_key,
            parent_id,
        } => {
            assert_eq!(chatid.as_str(), "room-1");
            assert_eq!(message, "hello");
            assert_eq!(idempotency_key.as_deref(), Some("k-1"));
            assert!(parent_id.is_none());
        }
        other => panic!("wrong command: {other:?}"),
    }
}

#[test]
fn fetch_messages_defaults() {
    let json = r#"{"command":"fetch_messages","chatid":"room-1"}"#;
    let cmd: ClientCommand = serde_json::from_str(json).unwrap();
    assert!(matches!(
        cmd,
        ClientCommand::FetchMessages {
            before: None,
            limit: None,
            ..
        }
    ));
}

#[test]
fn ping_parses_without_fields() {
    let cmd: ClientCommand = serde_json::from_str(r#"{"command":"ping"}"#).unwrap();
    assert!(matches!(cmd, ClientCommand::Ping));
}

#[test]
fn unknown_command_is_rejected() {
    let json = r#"{"command":"drop_tables","chatid":"room-1"}"#;
    assert!(serde_json::from_str::<ClientCommand>(json).is_err());
}

#[test]
fn ai_stream_serialization() {
    let frame = ServerFrame::AiStream {
        correlation_id: "msg-1".into(),
        chunk: "The current".to_string(),
        is_final: false,
    };
    let json = frame.to_json();
    assert!(json.contains(r#""command":"ai_stream""#));
    assert!(json.contains(r#""correlation_id":"msg-1""#));
    assert!(json.contains(r#""is_final":false"#));
}

#[test]
fn presence_snapshot_shape() {
    let frame = ServerFrame::PresenceSnapshot {
        online: vec!["alice".into()],
        presence: vec![],
    };
    let json = frame.to_json();
    assert!(json.contains(r#""command":"presence_snapshot""#));
    assert!(json.contains(r#""online":["alice"]"#));
}

#[test]
fn message_view_omits_absent_parent() {
    let view = MessageView {
        id: "m-1".into(),
        chatid: "room-1".into(),
        sender: "alice".into(),
        body: "hi".to_string(),
        ts: "2026-01-01T00:00:00Z".to_string(),
        parent_id: None,
        flags: MessageFlags::default(),
    };
    let json = serde_json::to_string(&view).unwrap();
    assert!(!json.contains("parent_id"));
}

#[test]
fn typing_is_the_only_droppable_frame() {
    let typing = ServerFrame::Typing {
        from: "alice".into(),
        chatid: "room-1".into(),
    };
    assert!(typing.is_droppable());

    let msg = ServerFrame::NewMessage {
        message: MessageView {
            id: "m-1".into(),
            chatid: "room-1".into(),
            sender: "alice".into(),
            body: "hi".to_string(),
            ts: "2026-01-01T00:00:00Z".to_string(),
            parent_id: None,
            flags: MessageFlags::default(),
        },
    };
    assert!(!msg.is_droppable());
}

#[test]
fn presence_status_wire_casing() {
    assert_eq!(
        serde_json::to_string(&PresenceStatus::Online).unwrap(),
        r#""online""#
    );
}

#[test]
fn close_codes() {
    assert_eq!(close::UNAUTHENTICATED, 4001);
    assert_eq!(close::FORBIDDEN, 4003);
    assert_eq!(close::RATE_LIMIT, 4008);
    assert_eq!(close::INTERNAL, 1011);
}
