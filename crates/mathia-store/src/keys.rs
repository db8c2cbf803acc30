use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::info;

use mathia_core::types::RoomId;

use crate::error::{Result, StoreError};
use crate::types::RoomKeyRecord;
use crate::Store;

impl Store {
    /// Insert the first key version for a room.
    pub fn insert_room_key(&self, room: &RoomId, wrapped: &[u8]) -> Result<RoomKeyRecord> {
        self.insert_room_key_version(room, 1, wrapped)
    }

    /// Rotate: write `max(version) + 1`. Old versions are retained so
    /// historical messages stay decryptable.
    pub fn rotate_room_key(&self, room: &RoomId, wrapped: &[u8]) -> Result<RoomKeyRecord> {
        let next = {
            let conn = self.conn.lock().unwrap();
            let current: Option<i64> = conn
                .query_row(
                    "SELECT MAX(version) FROM room_keys WHERE room_id = ?1",
                    rusqlite::params![room.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            current.unwrap_or(0) + 1
        };
        let rec = self.insert_room_key_version(room, next, wrapped)?;
        info!(room_id = %room, version = next, "room key rotated");
        Ok(rec)
    }

    fn insert_room_key_version(
        &self,
        room: &RoomId,
        version: i64,
        wrapped: &[u8],
    ) -> Result<RoomKeyRecord> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO room_keys (room_id, version, wrapped, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![room.as_str(), version, wrapped, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(format!("room key version {version} already exists"))
            }
            other => StoreError::Database(other),
        })?;
        Ok(RoomKeyRecord {
            room_id: room.clone(),
            version,
            wrapped: wrapped.to_vec(),
            created_at: now,
        })
    }

    /// The active (highest-version) key of a room.
    pub fn active_room_key(&self, room: &RoomId) -> Result<Option<RoomKeyRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT room_id, version, wrapped, created_at FROM room_keys
             WHERE room_id = ?1 ORDER BY version DESC LIMIT 1",
            rusqlite::params![room.as_str()],
            row_to_key,
        )
        .optional()
        .map_err(StoreError::Database)
    }

    /// A specific key version, needed to decrypt messages written before a
    /// rotation.
    pub fn room_key_version(&self, room: &RoomId, version: i64) -> Result<Option<RoomKeyRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT room_id, version, wrapped, created_at FROM room_keys
             WHERE room_id = ?1 AND version = ?2",
            rusqlite::params![room.as_str(), version],
            row_to_key,
        )
        .optional()
        .map_err(StoreError::Database)
    }
}

fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomKeyRecord> {
    Ok(RoomKeyRecord {
        room_id: RoomId::from(row.get::<_, String>(0)?),
        version: row.get(1)?,
        wrapped: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathia_core::types::RoomKind;

    #[test]
    fn rotation_bumps_version_and_keeps_old() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        let room = store.create_room(RoomKind::Group, "general", &alice).unwrap().id;

        store.insert_room_key(&room, b"wrapped-v1").unwrap();
        store.rotate_room_key(&room, b"wrapped-v2").unwrap();

        let active = store.active_room_key(&room).unwrap().unwrap();
        assert_eq!(active.version, 2);
        assert_eq!(active.wrapped, b"wrapped-v2".to_vec());

        let old = store.room_key_version(&room, 1).unwrap().unwrap();
        assert_eq!(old.wrapped, b"wrapped-v1".to_vec());
    }
}
