use chrono::{DateTime, Utc};

use mathia_core::types::UserId;

use crate::error::Result;
use crate::Store;

impl Store {
    /// Record one connector call in the durable usage mirror. The in-memory
    /// limiter is authoritative for admission; these rows back `GET /quota`
    /// and survive restarts.
    pub fn bump_connector_usage(
        &self,
        user: &UserId,
        connector: &str,
        window_start: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO connector_usage (user_id, connector, window_start, count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(user_id, connector, window_start)
             DO UPDATE SET count = count + 1",
            rusqlite::params![user.as_str(), connector, window_start.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn connector_usage(
        &self,
        user: &UserId,
        connector: &str,
        window_start: DateTime<Utc>,
    ) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: Option<i64> = conn.query_row(
            "SELECT SUM(count) FROM connector_usage
             WHERE user_id = ?1 AND connector = ?2 AND window_start >= ?3",
            rusqlite::params![user.as_str(), connector, window_start.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count.unwrap_or(0) as u32)
    }

    /// Drop windows older than the horizon.
    pub fn compact_connector_usage(&self, horizon: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM connector_usage WHERE window_start < ?1",
            rusqlite::params![horizon.to_rfc3339()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn bump_and_compact() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        let now = Utc::now();
        let window = now - Duration::minutes(now.timestamp() as i64 % 60);

        store.bump_connector_usage(&alice, "travel", window).unwrap();
        store.bump_connector_usage(&alice, "travel", window).unwrap();
        assert_eq!(store.connector_usage(&alice, "travel", window).unwrap(), 2);

        // nothing newer than the horizon is dropped
        assert_eq!(
            store
                .compact_connector_usage(window - Duration::hours(2))
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .compact_connector_usage(window + Duration::hours(2))
                .unwrap(),
            1
        );
    }
}
