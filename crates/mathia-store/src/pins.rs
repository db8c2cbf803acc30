use chrono::Utc;

use mathia_core::types::{MessageId, RoomId, UserId};

use crate::error::{Result, StoreError};
use crate::types::MessageRecord;
use crate::Store;

impl Store {
    /// Pin a message to its room. Pinning twice is a no-op.
    pub fn pin_message(&self, room: &RoomId, message: &MessageId, by: &UserId) -> Result<()> {
        let msg = self
            .get_message(message)?
            .ok_or_else(|| StoreError::NotFound {
                what: "message",
                id: message.to_string(),
            })?;
        if msg.room_id != *room {
            return Err(StoreError::Invariant(
                "message belongs to a different room".to_string(),
            ));
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO pins (room_id, message_id, pinned_by, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                room.as_str(),
                message.as_str(),
                by.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn unpin_message(&self, room: &RoomId, message: &MessageId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM pins WHERE room_id = ?1 AND message_id = ?2",
            rusqlite::params![room.as_str(), message.as_str()],
        )?;
        Ok(())
    }

    /// Pinned messages of a room, newest pin first.
    pub fn pinned_messages(&self, room: &RoomId) -> Result<Vec<MessageRecord>> {
        let ids: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT message_id FROM pins WHERE room_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(rusqlite::params![room.as_str()], |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(msg) = self.get_message(&MessageId::from(id))? {
                out.push(msg);
            }
        }
        Ok(out)
    }

    /// Replies to a message, in persisted order.
    pub fn replies_to(&self, parent: &MessageId, limit: usize) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, room_id, sender_id, ciphertext, nonce, key_version, ts,
                    parent_id, flags, deleted
             FROM messages WHERE parent_id = ?1 AND deleted = 0
             ORDER BY rowid LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![parent.as_str(), limit as i64],
            crate::messages::row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewMessage;
    use mathia_core::types::{MessageFlags, RoomKind};

    #[test]
    fn pin_unpin_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        let room = store.create_room(RoomKind::Group, "general", &alice).unwrap().id;
        let msg = store
            .append_message(NewMessage {
                room_id: &room,
                sender_id: &alice,
                ciphertext: b"ct".to_vec(),
                nonce: vec![0u8; 12],
                key_version: 1,
                parent_id: None,
                flags: MessageFlags::default(),
            })
            .unwrap();

        store.pin_message(&room, &msg.id, &alice).unwrap();
        // idempotent
        store.pin_message(&room, &msg.id, &alice).unwrap();
        assert_eq!(store.pinned_messages(&room).unwrap().len(), 1);

        store.unpin_message(&room, &msg.id).unwrap();
        assert!(store.pinned_messages(&room).unwrap().is_empty());
    }
}
