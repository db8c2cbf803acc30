use serde::{Deserialize, Serialize};

use mathia_core::types::{
    MemberRole, MessageFlags, MessageId, ReminderChannel, ReminderStatus, RoomId, RoomKind, UserId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub kind: RoomKind,
    pub display_name: String,
    pub owner_id: UserId,
    pub archived: bool,
    pub summary: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub joined_at: String,
    pub last_read_at: Option<String>,
}

/// A persisted message. The body exists only as ciphertext + nonce; the
/// plaintext is reconstructed at the egress boundary.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub key_version: i64,
    pub ts: String,
    pub parent_id: Option<MessageId>,
    pub flags: MessageFlags,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct RoomKeyRecord {
    pub room_id: RoomId,
    pub version: i64,
    pub wrapped: Vec<u8>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub id: String,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub content: String,
    pub due_at: String,
    pub channel: ReminderChannel,
    pub status: ReminderStatus,
    pub attempts: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub user_id: UserId,
    pub currency: String,
    pub balance_minor: i64,
    pub overdraft: bool,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTxnRecord {
    pub id: String,
    pub wallet_user: UserId,
    pub wallet_currency: String,
    pub delta_minor: i64,
    pub reason: String,
    pub external_ref: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub user_id: UserId,
    pub provider: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub expires_at: Option<String>,
}
