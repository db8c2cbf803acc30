use chrono::Utc;
use rusqlite::OptionalExtension;

use mathia_core::types::{MessageFlags, MessageId, RoomId, UserId};

use crate::error::{Result, StoreError};
use crate::types::MessageRecord;
use crate::Store;

/// Parameters for a message append. The body arrives already encrypted;
/// this layer never sees plaintext.
pub struct NewMessage<'a> {
    pub room_id: &'a RoomId,
    pub sender_id: &'a UserId,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub key_version: i64,
    pub parent_id: Option<&'a MessageId>,
    pub flags: MessageFlags,
}

impl Store {
    /// Persist a message and bump the sender's read marker in the same
    /// transaction, so a sender never sees their own message as unread.
    ///
    /// `parent_id` must reference a message in the same room.
    pub fn append_message(&self, new: NewMessage<'_>) -> Result<MessageRecord> {
        let id = MessageId::new();
        let ts = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if let Some(parent) = new.parent_id {
            let parent_room: Option<String> = tx
                .query_row(
                    "SELECT room_id FROM messages WHERE id = ?1",
                    rusqlite::params![parent.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match parent_room {
                Some(room) if room == new.room_id.as_str() => {}
                Some(_) => {
                    return Err(StoreError::Invariant(
                        "parent message belongs to a different room".to_string(),
                    ))
                }
                None => {
                    return Err(StoreError::NotFound {
                        what: "parent message",
                        id: parent.to_string(),
                    })
                }
            }
        }

        tx.execute(
            "INSERT INTO messages
             (id, room_id, sender_id, ciphertext, nonce, key_version, ts, parent_id, flags, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
            rusqlite::params![
                id.as_str(),
                new.room_id.as_str(),
                new.sender_id.as_str(),
                new.ciphertext,
                new.nonce,
                new.key_version,
                ts,
                new.parent_id.map(|p| p.as_str()),
                new.flags.to_bits(),
            ],
        )?;
        tx.execute(
            "UPDATE memberships SET last_read_at = ?1 WHERE room_id = ?2 AND user_id = ?3",
            rusqlite::params![ts, new.room_id.as_str(), new.sender_id.as_str()],
        )?;
        tx.commit()?;

        Ok(MessageRecord {
            id,
            room_id: new.room_id.clone(),
            sender_id: new.sender_id.clone(),
            ciphertext: new.ciphertext,
            nonce: new.nonce,
            key_version: new.key_version,
            ts,
            parent_id: new.parent_id.cloned(),
            flags: new.flags,
            deleted: false,
        })
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Option<MessageRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{SELECT_MESSAGE} WHERE id = ?1"),
            rusqlite::params![id.as_str()],
            row_to_message,
        )
        .optional()
        .map_err(StoreError::Database)
    }

    /// The most recent `limit` messages of a room, ascending by persisted
    /// order. When `before` names a message, only strictly older messages
    /// are returned — the history-paging cursor.
    pub fn page_before(
        &self,
        room: &RoomId,
        before: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock().unwrap();

        // rowid is the persisted order; ts alone can collide within a
        // millisecond
        let mut page: Vec<MessageRecord> = match before {
            Some(cursor) => {
                let anchor: Option<i64> = conn
                    .query_row(
                        "SELECT rowid FROM messages WHERE id = ?1",
                        rusqlite::params![cursor.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(anchor_rowid) = anchor else {
                    return Ok(Vec::new());
                };
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_MESSAGE}
                     WHERE room_id = ?1 AND deleted = 0 AND rowid < ?2
                     ORDER BY rowid DESC LIMIT ?3"
                ))?;
                let rows = stmt.query_map(
                    rusqlite::params![room.as_str(), anchor_rowid, limit as i64],
                    row_to_message,
                )?;
                rows.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_MESSAGE}
                     WHERE room_id = ?1 AND deleted = 0
                     ORDER BY rowid DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(
                    rusqlite::params![room.as_str(), limit as i64],
                    row_to_message,
                )?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };

        page.reverse();
        Ok(page)
    }

    /// Recent messages of a room for the moderation batcher, newest first.
    pub fn recent_messages(&self, room: &RoomId, limit: usize) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_MESSAGE}
             WHERE room_id = ?1 AND deleted = 0
             ORDER BY rowid DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![room.as_str(), limit as i64],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The only flag transition messages allow: moderated false → true.
    pub fn mark_moderated(&self, id: &MessageId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            // flag bit 4 (16) = moderated; see MessageFlags::to_bits
            "UPDATE messages SET flags = flags | 16 WHERE id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "message",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn soft_delete_message(&self, id: &MessageId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET deleted = 1 WHERE id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        Ok(())
    }
}

const SELECT_MESSAGE: &str = "SELECT id, room_id, sender_id, ciphertext, nonce, key_version, ts,
            parent_id, flags, deleted FROM messages";

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::from(row.get::<_, String>(0)?),
        room_id: RoomId::from(row.get::<_, String>(1)?),
        sender_id: UserId::from(row.get::<_, String>(2)?),
        ciphertext: row.get(3)?,
        nonce: row.get(4)?,
        key_version: row.get(5)?,
        ts: row.get(6)?,
        parent_id: row.get::<_, Option<String>>(7)?.map(MessageId::from),
        flags: MessageFlags::from_bits(row.get(8)?),
        deleted: row.get::<_, i64>(9)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathia_core::types::RoomKind;

    fn seeded() -> (Store, UserId, RoomId) {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        let room = store.create_room(RoomKind::Group, "general", &alice).unwrap().id;
        (store, alice, room)
    }

    fn append(store: &Store, room: &RoomId, sender: &UserId, body: &[u8]) -> MessageRecord {
        store
            .append_message(NewMessage {
                room_id: room,
                sender_id: sender,
                ciphertext: body.to_vec(),
                nonce: vec![0u8; 12],
                key_version: 1,
                parent_id: None,
                flags: MessageFlags::default(),
            })
            .unwrap()
    }

    #[test]
    fn page_preserves_persisted_order() {
        let (store, alice, room) = seeded();
        let m1 = append(&store, &room, &alice, b"ct-hello");
        let m2 = append(&store, &room, &alice, b"ct-world");

        let page = store.page_before(&room, None, 50).unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![m1.id.as_str(), m2.id.as_str()]);
        assert!(page[0].ts <= page[1].ts);
    }

    #[test]
    fn cursor_pages_older_messages() {
        let (store, alice, room) = seeded();
        let older: Vec<MessageRecord> = (0..5)
            .map(|i| append(&store, &room, &alice, format!("ct-{i}").as_bytes()))
            .collect();

        let page = store.page_before(&room, Some(&older[3].id), 2).unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![older[1].id.as_str(), older[2].id.as_str()]);
    }

    #[test]
    fn append_updates_sender_read_marker() {
        let (store, alice, room) = seeded();
        append(&store, &room, &alice, b"ct");
        let members = store.members_of(&room).unwrap();
        assert!(members[0].last_read_at.is_some());
    }

    #[test]
    fn parent_must_be_in_same_room() {
        let (store, alice, room) = seeded();
        let other = store.create_room(RoomKind::Group, "other", &alice).unwrap().id;
        let parent = append(&store, &room, &alice, b"ct-parent");

        let err = store
            .append_message(NewMessage {
                room_id: &other,
                sender_id: &alice,
                ciphertext: b"ct-reply".to_vec(),
                nonce: vec![0u8; 12],
                key_version: 1,
                parent_id: Some(&parent.id),
                flags: MessageFlags::default(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)));
    }

    #[test]
    fn moderated_flag_transition() {
        let (store, alice, room) = seeded();
        let msg = append(&store, &room, &alice, b"ct");
        assert!(!msg.flags.moderated);
        store.mark_moderated(&msg.id).unwrap();
        let reread = store.get_message(&msg.id).unwrap().unwrap();
        assert!(reread.flags.moderated);
    }

    #[test]
    fn no_plaintext_in_storage() {
        // the storage layer only ever receives ciphertext; this guards the
        // call convention by construction: NewMessage has no plaintext field
        let (store, alice, room) = seeded();
        let msg = append(&store, &room, &alice, b"opaque-bytes");
        assert_eq!(msg.ciphertext, b"opaque-bytes".to_vec());
    }
}
