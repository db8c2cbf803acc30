use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::info;
use uuid::Uuid;

use mathia_core::types::{ReminderChannel, ReminderStatus, RoomId, UserId};

use crate::error::{Result, StoreError};
use crate::types::ReminderRecord;
use crate::Store;

impl Store {
    pub fn create_reminder(
        &self,
        user: &UserId,
        room: &RoomId,
        content: &str,
        due_at: DateTime<Utc>,
        channel: ReminderChannel,
    ) -> Result<ReminderRecord> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let due = due_at.to_rfc3339();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO reminders (id, user_id, room_id, content, due_at, channel, status, attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7)",
            rusqlite::params![
                id,
                user.as_str(),
                room.as_str(),
                content,
                due,
                channel.as_str(),
                now
            ],
        )?;

        info!(reminder_id = %id, user_id = %user, due_at = %due, "reminder created");
        Ok(ReminderRecord {
            id,
            user_id: user.clone(),
            room_id: room.clone(),
            content: content.to_string(),
            due_at: due,
            channel,
            status: ReminderStatus::Pending,
            attempts: 0,
            created_at: now,
        })
    }

    /// Pending reminders whose due time has arrived, oldest first.
    pub fn due_reminders(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ReminderRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_REMINDER}
             WHERE status = 'pending' AND due_at <= ?1
             ORDER BY due_at LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![now.to_rfc3339(), limit as i64],
            row_to_reminder,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Atomically claim a pending reminder for dispatch. The conditional
    /// UPDATE is the row lock: only one dispatcher wins, so a reminder is
    /// never delivered twice for the same tick.
    pub fn claim_reminder(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE reminders SET status = 'dispatching', attempts = attempts + 1
             WHERE id = ?1 AND status = 'pending'",
            rusqlite::params![id],
        )?;
        Ok(n == 1)
    }

    /// Terminal transition after a successful delivery.
    pub fn mark_reminder_fired(&self, id: &str) -> Result<()> {
        self.transition_reminder(id, "dispatching", ReminderStatus::Fired)
    }

    /// Terminal transition after exhausting attempts.
    pub fn mark_reminder_failed(&self, id: &str) -> Result<()> {
        self.transition_reminder(id, "dispatching", ReminderStatus::Failed)
    }

    /// Transient failure: push the due time forward and return the row to
    /// the pending pool for the next tick.
    pub fn reschedule_reminder(&self, id: &str, next_due: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE reminders SET status = 'pending', due_at = ?1
             WHERE id = ?2 AND status = 'dispatching'",
            rusqlite::params![next_due.to_rfc3339(), id],
        )?;
        if n == 0 {
            return Err(StoreError::Conflict(format!(
                "reminder {id} is not dispatching"
            )));
        }
        Ok(())
    }

    pub fn cancel_reminder(&self, id: &str, user: &UserId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE reminders SET status = 'canceled'
             WHERE id = ?1 AND user_id = ?2 AND status = 'pending'",
            rusqlite::params![id, user.as_str()],
        )?;
        Ok(n == 1)
    }

    pub fn reminders_of(&self, user: &UserId, limit: usize) -> Result<Vec<ReminderRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_REMINDER}
             WHERE user_id = ?1 AND status IN ('pending','dispatching')
             ORDER BY due_at LIMIT ?2"
        ))?;
        let rows = stmt.query_map(rusqlite::params![user.as_str(), limit as i64], row_to_reminder)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_reminder(&self, id: &str) -> Result<Option<ReminderRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{SELECT_REMINDER} WHERE id = ?1"),
            rusqlite::params![id],
            row_to_reminder,
        )
        .optional()
        .map_err(StoreError::Database)
    }

    fn transition_reminder(&self, id: &str, from: &str, to: ReminderStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE reminders SET status = ?1 WHERE id = ?2 AND status = ?3",
            rusqlite::params![to.as_str(), id, from],
        )?;
        if n == 0 {
            return Err(StoreError::Conflict(format!(
                "reminder {id} is not in state {from}"
            )));
        }
        Ok(())
    }
}

const SELECT_REMINDER: &str = "SELECT id, user_id, room_id, content, due_at, channel, status, attempts, created_at
     FROM reminders";

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReminderRecord> {
    let channel_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    Ok(ReminderRecord {
        id: row.get(0)?,
        user_id: UserId::from(row.get::<_, String>(1)?),
        room_id: RoomId::from(row.get::<_, String>(2)?),
        content: row.get(3)?,
        due_at: row.get(4)?,
        channel: channel_str.parse().unwrap_or(ReminderChannel::Inapp),
        status: status_str.parse().unwrap_or(ReminderStatus::Pending),
        attempts: row.get::<_, i64>(7)? as u32,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mathia_core::types::RoomKind;

    fn seeded() -> (Store, UserId, RoomId) {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        let room = store.create_room(RoomKind::Ai, "assistant", &alice).unwrap().id;
        (store, alice, room)
    }

    #[test]
    fn due_boundary() {
        let (store, alice, room) = seeded();
        let now = Utc::now();
        store
            .create_reminder(&alice, &room, "early", now - Duration::seconds(1), ReminderChannel::Inapp)
            .unwrap();
        store
            .create_reminder(&alice, &room, "late", now + Duration::seconds(30), ReminderChannel::Inapp)
            .unwrap();

        let due = store.due_reminders(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].content, "early");

        // the future one becomes due once the clock passes it
        let due_later = store
            .due_reminders(now + Duration::seconds(31), 10)
            .unwrap();
        assert_eq!(due_later.len(), 2);
    }

    #[test]
    fn claim_is_exclusive() {
        let (store, alice, room) = seeded();
        let r = store
            .create_reminder(&alice, &room, "standup", Utc::now(), ReminderChannel::Inapp)
            .unwrap();

        assert!(store.claim_reminder(&r.id).unwrap());
        // second claim loses — at-most-once dispatch per tick
        assert!(!store.claim_reminder(&r.id).unwrap());

        store.mark_reminder_fired(&r.id).unwrap();
        let reread = store.get_reminder(&r.id).unwrap().unwrap();
        assert_eq!(reread.status, ReminderStatus::Fired);
        assert_eq!(reread.attempts, 1);
    }

    #[test]
    fn fired_is_terminal() {
        let (store, alice, room) = seeded();
        let r = store
            .create_reminder(&alice, &room, "standup", Utc::now(), ReminderChannel::Inapp)
            .unwrap();
        store.claim_reminder(&r.id).unwrap();
        store.mark_reminder_fired(&r.id).unwrap();

        // no further claims or transitions out of fired
        assert!(!store.claim_reminder(&r.id).unwrap());
        assert!(store.mark_reminder_failed(&r.id).is_err());
    }

    #[test]
    fn reschedule_returns_to_pending() {
        let (store, alice, room) = seeded();
        let r = store
            .create_reminder(&alice, &room, "standup", Utc::now(), ReminderChannel::Email)
            .unwrap();
        store.claim_reminder(&r.id).unwrap();
        store
            .reschedule_reminder(&r.id, Utc::now() + Duration::minutes(1))
            .unwrap();

        let reread = store.get_reminder(&r.id).unwrap().unwrap();
        assert_eq!(reread.status, ReminderStatus::Pending);
        assert_eq!(reread.attempts, 1);
    }

    #[test]
    fn cancel_only_when_pending() {
        let (store, alice, room) = seeded();
        let r = store
            .create_reminder(&alice, &room, "standup", Utc::now(), ReminderChannel::Inapp)
            .unwrap();
        assert!(store.cancel_reminder(&r.id, &alice).unwrap());
        // canceled is terminal — cannot cancel twice or claim
        assert!(!store.cancel_reminder(&r.id, &alice).unwrap());
        assert!(!store.claim_reminder(&r.id).unwrap());
    }
}
