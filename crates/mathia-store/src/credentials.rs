use rusqlite::OptionalExtension;

use mathia_core::types::UserId;

use crate::error::{Result, StoreError};
use crate::types::CredentialRecord;
use crate::Store;

impl Store {
    /// Upsert an integration credential. The caller supplies ciphertext —
    /// plaintext credentials never reach this layer.
    pub fn put_credential(&self, rec: &CredentialRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO credentials (user_id, provider, ciphertext, nonce, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, provider)
             DO UPDATE SET ciphertext = ?3, nonce = ?4, expires_at = ?5",
            rusqlite::params![
                rec.user_id.as_str(),
                rec.provider,
                rec.ciphertext,
                rec.nonce,
                rec.expires_at
            ],
        )?;
        Ok(())
    }

    pub fn get_credential(
        &self,
        user: &UserId,
        provider: &str,
    ) -> Result<Option<CredentialRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id, provider, ciphertext, nonce, expires_at
             FROM credentials WHERE user_id = ?1 AND provider = ?2",
            rusqlite::params![user.as_str(), provider],
            |row| {
                Ok(CredentialRecord {
                    user_id: UserId::from(row.get::<_, String>(0)?),
                    provider: row.get(1)?,
                    ciphertext: row.get(2)?,
                    nonce: row.get(3)?,
                    expires_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::Database)
    }

    pub fn revoke_credential(&self, user: &UserId, provider: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM credentials WHERE user_id = ?1 AND provider = ?2",
            rusqlite::params![user.as_str(), provider],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_revoke() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;

        let rec = CredentialRecord {
            user_id: alice.clone(),
            provider: "calendly".to_string(),
            ciphertext: b"ct-v1".to_vec(),
            nonce: vec![0u8; 12],
            expires_at: None,
        };
        store.put_credential(&rec).unwrap();

        // refresh replaces in place
        let refreshed = CredentialRecord {
            ciphertext: b"ct-v2".to_vec(),
            ..rec
        };
        store.put_credential(&refreshed).unwrap();
        let got = store.get_credential(&alice, "calendly").unwrap().unwrap();
        assert_eq!(got.ciphertext, b"ct-v2".to_vec());

        store.revoke_credential(&alice, "calendly").unwrap();
        assert!(store.get_credential(&alice, "calendly").unwrap().is_none());
    }
}
