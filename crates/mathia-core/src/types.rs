use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a user (UUIDv7 — time-sortable for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a message. Doubles as the correlation id when the
/// message forks into the assistant pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Room kind. Exactly one `ai` room exists per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
    Ai,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Direct => "direct",
            RoomKind::Group => "group",
            RoomKind::Ai => "ai",
        }
    }
}

impl std::str::FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "direct" => Ok(RoomKind::Direct),
            "group" => Ok(RoomKind::Group),
            "ai" => Ok(RoomKind::Ai),
            other => Err(format!("unknown room kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
    Guest,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Member => "member",
            MemberRole::Guest => "guest",
        }
    }
}

impl std::str::FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "owner" => Ok(MemberRole::Owner),
            "member" => Ok(MemberRole::Member),
            "guest" => Ok(MemberRole::Guest),
            other => Err(format!("unknown member role: {other}")),
        }
    }
}

/// Delivery channel for a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderChannel {
    Inapp,
    Email,
    Whatsapp,
    /// Email AND whatsapp, attempted sequentially (email first).
    Both,
}

impl ReminderChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderChannel::Inapp => "inapp",
            ReminderChannel::Email => "email",
            ReminderChannel::Whatsapp => "whatsapp",
            ReminderChannel::Both => "both",
        }
    }
}

impl std::str::FromStr for ReminderChannel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inapp" => Ok(ReminderChannel::Inapp),
            "email" => Ok(ReminderChannel::Email),
            "whatsapp" => Ok(ReminderChannel::Whatsapp),
            "both" => Ok(ReminderChannel::Both),
            other => Err(format!("unknown reminder channel: {other}")),
        }
    }
}

/// Reminder lifecycle. Transitions are forward-only; `fired` and `failed`
/// are terminal, `canceled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Dispatching,
    Fired,
    Failed,
    Canceled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Dispatching => "dispatching",
            ReminderStatus::Fired => "fired",
            ReminderStatus::Failed => "failed",
            ReminderStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReminderStatus::Fired | ReminderStatus::Failed | ReminderStatus::Canceled
        )
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "dispatching" => Ok(ReminderStatus::Dispatching),
            "fired" => Ok(ReminderStatus::Fired),
            "failed" => Ok(ReminderStatus::Failed),
            "canceled" => Ok(ReminderStatus::Canceled),
            other => Err(format!("unknown reminder status: {other}")),
        }
    }
}

/// Per-message boolean flags, stored as a packed bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    #[serde(default)]
    pub image: bool,
    #[serde(default)]
    pub file: bool,
    #[serde(default)]
    pub voice: bool,
    #[serde(default)]
    pub assistant: bool,
    #[serde(default)]
    pub moderated: bool,
}

impl MessageFlags {
    pub fn to_bits(&self) -> i64 {
        (self.image as i64)
            | (self.file as i64) << 1
            | (self.voice as i64) << 2
            | (self.assistant as i64) << 3
            | (self.moderated as i64) << 4
    }

    pub fn from_bits(bits: i64) -> Self {
        Self {
            image: bits & 1 != 0,
            file: bits & 2 != 0,
            voice: bits & 4 != 0,
            assistant: bits & 8 != 0,
            moderated: bits & 16 != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_round_trip() {
        let flags = MessageFlags {
            image: true,
            assistant: true,
            ..Default::default()
        };
        assert_eq!(MessageFlags::from_bits(flags.to_bits()), flags);
        assert_eq!(MessageFlags::from_bits(0), MessageFlags::default());
    }

    #[test]
    fn reminder_status_terminality() {
        assert!(ReminderStatus::Fired.is_terminal());
        assert!(ReminderStatus::Failed.is_terminal());
        assert!(ReminderStatus::Canceled.is_terminal());
        assert!(!ReminderStatus::Pending.is_terminal());
        assert!(!ReminderStatus::Dispatching.is_terminal());
    }

    #[test]
    fn enum_string_round_trips() {
        for kind in ["direct", "group", "ai"] {
            let parsed: RoomKind = kind.parse().unwrap();
            assert_eq!(parsed.as_str(), kind);
        }
        for ch in ["inapp", "email", "whatsapp", "both"] {
            let parsed: ReminderChannel = ch.parse().unwrap();
            assert_eq!(parsed.as_str(), ch);
        }
    }
}
