use serde::{Deserialize, Serialize};

use mathia_core::types::{MessageFlags, MessageId, RoomId, UserId};

/// Client → Server frame, discriminated by `command`.
/// Wire: `{ "command": "new_message", "chatid": "...", "message": "hi" }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    FetchMessages {
        chatid: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        before: Option<MessageId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    NewMessage {
        chatid: RoomId,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        idempotency_key: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<MessageId>,
    },
    Typing {
        chatid: RoomId,
        from: UserId,
    },
    FileMessage {
        chatid: RoomId,
        file_ref: String,
        kind: FileKind,
    },
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    File,
    Voice,
}

/// A message as clients see it — decrypted at the egress boundary. A body
/// that fails decryption is surfaced as `[unreadable]`, never dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub chatid: RoomId,
    pub sender: UserId,
    pub body: String,
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    #[serde(default)]
    pub flags: MessageFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user: UserId,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Server → Client frame, discriminated by `command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ServerFrame {
    Messages {
        messages: Vec<MessageView>,
    },
    NewMessage {
        message: MessageView,
    },
    AiStream {
        correlation_id: MessageId,
        chunk: String,
        is_final: bool,
    },
    AiMessageSaved {
        correlation_id: MessageId,
        message: MessageView,
    },
    Presence {
        user: UserId,
        status: PresenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<String>,
    },
    PresenceSnapshot {
        online: Vec<UserId>,
        presence: Vec<PresenceEntry>,
    },
    Typing {
        from: UserId,
        chatid: RoomId,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    /// Serialize for the wire. Frames are built from trusted server types,
    /// so serialization cannot fail in practice; an empty string is safe to
    /// send and logs loudly downstream.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Typing indicators are droppable under backpressure; everything else
    /// is not.
    pub fn is_droppable(&self) -> bool {
        matches!(self, ServerFrame::Typing { .. })
    }
}
