use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::info;

use mathia_core::types::{MemberRole, RoomId, RoomKind, UserId};

use crate::error::{Result, StoreError};
use crate::types::{MembershipRecord, RoomRecord};
use crate::Store;

impl Store {
    /// Create a room and its owner membership in one transaction.
    /// A second `ai` room for the same owner is rejected as `Conflict`.
    pub fn create_room(
        &self,
        kind: RoomKind,
        display_name: &str,
        owner: &UserId,
    ) -> Result<RoomRecord> {
        let id = RoomId::new();
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO rooms (id, kind, display_name, owner_id, archived, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            rusqlite::params![id.as_str(), kind.as_str(), display_name, owner.as_str(), now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && kind == RoomKind::Ai =>
            {
                StoreError::Conflict(format!("user {owner} already has an assistant room"))
            }
            other => StoreError::Database(other),
        })?;
        tx.execute(
            "INSERT INTO memberships (room_id, user_id, role, joined_at)
             VALUES (?1, ?2, 'owner', ?3)",
            rusqlite::params![id.as_str(), owner.as_str(), now],
        )?;
        tx.commit()?;

        info!(room_id = %id, kind = kind.as_str(), "room created");
        Ok(RoomRecord {
            id,
            kind,
            display_name: display_name.to_string(),
            owner_id: owner.clone(),
            archived: false,
            summary: None,
            created_at: now,
        })
    }

    pub fn get_room(&self, id: &RoomId) -> Result<Option<RoomRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, kind, display_name, owner_id, archived, summary, created_at
             FROM rooms WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_room,
        )
        .optional()
        .map_err(StoreError::Database)
    }

    /// The user's assistant room, if one exists.
    pub fn ai_room_of(&self, user: &UserId) -> Result<Option<RoomRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, kind, display_name, owner_id, archived, summary, created_at
             FROM rooms WHERE owner_id = ?1 AND kind = 'ai'",
            rusqlite::params![user.as_str()],
            row_to_room,
        )
        .optional()
        .map_err(StoreError::Database)
    }

    pub fn add_member(&self, room: &RoomId, user: &UserId, role: MemberRole) -> Result<()> {
        // direct rooms hold exactly two members
        let conn = self.conn.lock().unwrap();
        let kind: String = conn.query_row(
            "SELECT kind FROM rooms WHERE id = ?1",
            rusqlite::params![room.as_str()],
            |row| row.get(0),
        )?;
        if kind == "direct" {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memberships WHERE room_id = ?1",
                rusqlite::params![room.as_str()],
                |row| row.get(0),
            )?;
            if count >= 2 {
                return Err(StoreError::Conflict(
                    "direct rooms have exactly two members".to_string(),
                ));
            }
        }

        conn.execute(
            "INSERT OR IGNORE INTO memberships (room_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                room.as_str(),
                user.as_str(),
                role.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Remove a membership; historical messages remain.
    pub fn remove_member(&self, room: &RoomId, user: &UserId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM memberships WHERE room_id = ?1 AND user_id = ?2",
            rusqlite::params![room.as_str(), user.as_str()],
        )?;
        Ok(())
    }

    pub fn is_member(&self, room: &RoomId, user: &UserId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memberships WHERE room_id = ?1 AND user_id = ?2",
            rusqlite::params![room.as_str(), user.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn members_of(&self, room: &RoomId) -> Result<Vec<MembershipRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT room_id, user_id, role, joined_at, last_read_at
             FROM memberships WHERE room_id = ?1 ORDER BY joined_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![room.as_str()], row_to_membership)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn rooms_of(&self, user: &UserId) -> Result<Vec<RoomRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.kind, r.display_name, r.owner_id, r.archived, r.summary, r.created_at
             FROM rooms r JOIN memberships m ON m.room_id = r.id
             WHERE m.user_id = ?1 ORDER BY r.created_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![user.as_str()], row_to_room)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Update a member's read marker (also touched by the message pipeline
    /// inside its own transaction).
    pub fn mark_read(&self, room: &RoomId, user: &UserId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE memberships SET last_read_at = ?1 WHERE room_id = ?2 AND user_id = ?3",
            rusqlite::params![Utc::now().to_rfc3339(), room.as_str(), user.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "membership",
                id: format!("{room}/{user}"),
            });
        }
        Ok(())
    }

    /// Summaries are written by the context summarizer; messages are never
    /// mutated by it.
    pub fn set_room_summary(&self, room: &RoomId, summary: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE rooms SET summary = ?1 WHERE id = ?2",
            rusqlite::params![summary, room.as_str()],
        )?;
        Ok(())
    }

    /// Rooms with at least one message since `since`, busiest first. Feeds
    /// the moderation and summarization batchers.
    pub fn rooms_with_recent_messages(&self, since: &str, limit: usize) -> Result<Vec<RoomId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT room_id, COUNT(*) AS n FROM messages
             WHERE ts >= ?1 AND deleted = 0
             GROUP BY room_id ORDER BY n DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![since, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.filter_map(|r| r.ok()).map(RoomId::from).collect())
    }

    /// Archive keeps keys and history for decryption, hides the room.
    pub fn archive_room(&self, room: &RoomId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE rooms SET archived = 1 WHERE id = ?1",
            rusqlite::params![room.as_str()],
        )?;
        Ok(())
    }
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRecord> {
    let kind_str: String = row.get(1)?;
    Ok(RoomRecord {
        id: RoomId::from(row.get::<_, String>(0)?),
        kind: kind_str.parse().unwrap_or(RoomKind::Group),
        display_name: row.get(2)?,
        owner_id: UserId::from(row.get::<_, String>(3)?),
        archived: row.get::<_, i64>(4)? != 0,
        summary: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<MembershipRecord> {
    let role_str: String = row.get(2)?;
    Ok(MembershipRecord {
        room_id: RoomId::from(row.get::<_, String>(0)?),
        user_id: UserId::from(row.get::<_, String>(1)?),
        role: role_str.parse().unwrap_or(MemberRole::Member),
        joined_at: row.get(3)?,
        last_read_at: row.get(4)?,
    })
}
