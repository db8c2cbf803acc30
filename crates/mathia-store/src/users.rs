use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use rusqlite::OptionalExtension;
use tracing::info;
use uuid::Uuid;

use mathia_core::types::UserId;

use crate::error::{Result, StoreError};
use crate::types::UserRecord;
use crate::Store;

const SESSION_TTL_DAYS: i64 = 14;

impl Store {
    /// Register a user. Username and email are unique; violations surface
    /// as `Conflict`.
    pub fn create_user(&self, username: &str, email: &str, password: &str) -> Result<UserRecord> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?
            .to_string();

        let id = UserId::new();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![id.as_str(), username, email, hash, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(format!("username or email already taken: {username}"))
            }
            other => StoreError::Database(other),
        })?;

        info!(user_id = %id, %username, "user created");
        Ok(UserRecord {
            id,
            username: username.to_string(),
            email: email.to_string(),
            active: true,
            created_at: now,
        })
    }

    pub fn get_user(&self, id: &UserId) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, username, email, active, created_at FROM users WHERE id = ?1",
            rusqlite::params![id.as_str()],
            row_to_user,
        )
        .optional()
        .map_err(StoreError::Database)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, username, email, active, created_at FROM users WHERE username = ?1",
            rusqlite::params![username],
            row_to_user,
        )
        .optional()
        .map_err(StoreError::Database)
    }

    /// Verify credentials and mint a session token.
    pub fn login(&self, username: &str, password: &str) -> Result<Option<String>> {
        let stored: Option<(String, String)> = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT id, password_hash FROM users WHERE username = ?1 AND active = 1",
                rusqlite::params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((user_id, hash)) = stored else {
            return Ok(None);
        };

        let parsed =
            PasswordHash::new(&hash).map_err(|e| StoreError::PasswordHash(e.to_string()))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Ok(None);
        }

        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires = now + Duration::days(SESSION_TTL_DAYS);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token, user_id, now.to_rfc3339(), expires.to_rfc3339()],
        )?;
        Ok(Some(token))
    }

    /// Resolve a session cookie to its user, `None` when missing or expired.
    pub fn session_user(&self, token: &str) -> Result<Option<UserId>> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let user: Option<String> = conn
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2",
                rusqlite::params![token, now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(user.map(UserId::from))
    }

    /// Soft-deactivate. Users owning messages are never hard-deleted.
    pub fn deactivate_user(&self, id: &UserId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE users SET active = 0 WHERE id = ?1",
            rusqlite::params![id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "user",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: UserId::from(row.get::<_, String>(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_login_session_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("alice", "alice@example.com", "hunter22").unwrap();

        let token = store.login("alice", "hunter22").unwrap().unwrap();
        assert_eq!(store.session_user(&token).unwrap(), Some(user.id));

        // wrong password yields no token
        assert!(store.login("alice", "wrong").unwrap().is_none());
        // unknown tokens resolve to nothing
        assert!(store.session_user("bogus").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_conflicts() {
        let store = Store::open_in_memory().unwrap();
        store.create_user("alice", "a@example.com", "pw").unwrap();
        let err = store.create_user("alice", "b@example.com", "pw").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn deactivated_user_cannot_login() {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("bob", "bob@example.com", "pw").unwrap();
        store.deactivate_user(&user.id).unwrap();
        assert!(store.login("bob", "pw").unwrap().is_none());
    }
}
