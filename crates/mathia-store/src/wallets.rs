use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use mathia_core::types::UserId;

use crate::error::{Result, StoreError};
use crate::types::{WalletRecord, WalletTxnRecord};
use crate::Store;

impl Store {
    /// Wallet for (user, currency), created on first credit.
    pub fn get_or_create_wallet(&self, user: &UserId, currency: &str) -> Result<WalletRecord> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO wallets (user_id, currency, balance_minor, overdraft, updated_at)
             VALUES (?1, ?2, 0, 0, ?3)",
            rusqlite::params![user.as_str(), currency, now],
        )?;
        conn.query_row(
            "SELECT user_id, currency, balance_minor, overdraft, updated_at
             FROM wallets WHERE user_id = ?1 AND currency = ?2",
            rusqlite::params![user.as_str(), currency],
            row_to_wallet,
        )
        .map_err(StoreError::Database)
    }

    pub fn get_wallet(&self, user: &UserId, currency: &str) -> Result<Option<WalletRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id, currency, balance_minor, overdraft, updated_at
             FROM wallets WHERE user_id = ?1 AND currency = ?2",
            rusqlite::params![user.as_str(), currency],
            row_to_wallet,
        )
        .optional()
        .map_err(StoreError::Database)
    }

    /// Apply a signed delta and record the transaction, atomically.
    ///
    /// The balance update and the txn insert share one transaction on the
    /// wallet aggregate; `sum(delta_minor) == balance_minor` holds at every
    /// commit point. A negative resulting balance is rejected unless the
    /// wallet carries the overdraft entitlement. A duplicate `external_ref`
    /// is a `Conflict` — the idempotency hook for webhook-driven credits.
    pub fn apply_wallet_txn(
        &self,
        user: &UserId,
        currency: &str,
        delta_minor: i64,
        reason: &str,
        external_ref: Option<&str>,
    ) -> Result<WalletTxnRecord> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::now_v7().to_string();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let wallet: Option<(i64, bool)> = tx
            .query_row(
                "SELECT balance_minor, overdraft FROM wallets
                 WHERE user_id = ?1 AND currency = ?2",
                rusqlite::params![user.as_str(), currency],
                |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .optional()?;
        let (balance, overdraft) = match wallet {
            Some(w) => w,
            None => {
                // created on first credit; a first debit has nothing to take from
                tx.execute(
                    "INSERT INTO wallets (user_id, currency, balance_minor, overdraft, updated_at)
                     VALUES (?1, ?2, 0, 0, ?3)",
                    rusqlite::params![user.as_str(), currency, now],
                )?;
                (0, false)
            }
        };

        let new_balance = balance + delta_minor;
        if new_balance < 0 && !overdraft {
            return Err(StoreError::Invariant(format!(
                "insufficient funds: balance {balance}, delta {delta_minor}"
            )));
        }

        tx.execute(
            "INSERT INTO wallet_txns
             (id, wallet_user, wallet_currency, delta_minor, reason, external_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![id, user.as_str(), currency, delta_minor, reason, external_ref, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(format!(
                    "duplicate external_ref {:?}",
                    external_ref.unwrap_or("")
                ))
            }
            other => StoreError::Database(other),
        })?;
        tx.execute(
            "UPDATE wallets SET balance_minor = ?1, updated_at = ?2
             WHERE user_id = ?3 AND currency = ?4",
            rusqlite::params![new_balance, now, user.as_str(), currency],
        )?;
        tx.commit()?;

        Ok(WalletTxnRecord {
            id,
            wallet_user: user.clone(),
            wallet_currency: currency.to_string(),
            delta_minor,
            reason: reason.to_string(),
            external_ref: external_ref.map(String::from),
            created_at: now,
        })
    }

    /// Most recent transactions, newest first. The chat connector caps
    /// `limit` at 20.
    pub fn wallet_txns(
        &self,
        user: &UserId,
        currency: &str,
        limit: usize,
    ) -> Result<Vec<WalletTxnRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, wallet_user, wallet_currency, delta_minor, reason, external_ref, created_at
             FROM wallet_txns WHERE wallet_user = ?1 AND wallet_currency = ?2
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user.as_str(), currency, limit as i64],
            row_to_txn,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Consistency probe: the txn-log sum for a wallet.
    pub fn wallet_txn_sum(&self, user: &UserId, currency: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let sum: Option<i64> = conn.query_row(
            "SELECT SUM(delta_minor) FROM wallet_txns
             WHERE wallet_user = ?1 AND wallet_currency = ?2",
            rusqlite::params![user.as_str(), currency],
            |row| row.get(0),
        )?;
        Ok(sum.unwrap_or(0))
    }

    pub fn set_overdraft(&self, user: &UserId, currency: &str, allowed: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE wallets SET overdraft = ?1 WHERE user_id = ?2 AND currency = ?3",
            rusqlite::params![allowed as i64, user.as_str(), currency],
        )?;
        Ok(())
    }
}

fn row_to_wallet(row: &rusqlite::Row<'_>) -> rusqlite::Result<WalletRecord> {
    Ok(WalletRecord {
        user_id: UserId::from(row.get::<_, String>(0)?),
        currency: row.get(1)?,
        balance_minor: row.get(2)?,
        overdraft: row.get::<_, i64>(3)? != 0,
        updated_at: row.get(4)?,
    })
}

fn row_to_txn(row: &rusqlite::Row<'_>) -> rusqlite::Result<WalletTxnRecord> {
    Ok(WalletTxnRecord {
        id: row.get(0)?,
        wallet_user: UserId::from(row.get::<_, String>(1)?),
        wallet_currency: row.get(2)?,
        delta_minor: row.get(3)?,
        reason: row.get(4)?,
        external_ref: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Store, UserId) {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        (store, alice)
    }

    #[test]
    fn balance_equals_txn_sum() {
        let (store, alice) = seeded();
        store.apply_wallet_txn(&alice, "KES", 5000, "topup", None).unwrap();
        store.apply_wallet_txn(&alice, "KES", -1200, "booking", None).unwrap();
        store.apply_wallet_txn(&alice, "KES", 300, "refund", None).unwrap();

        let wallet = store.get_wallet(&alice, "KES").unwrap().unwrap();
        assert_eq!(wallet.balance_minor, 4100);
        assert_eq!(store.wallet_txn_sum(&alice, "KES").unwrap(), 4100);
    }

    #[test]
    fn negative_balance_needs_overdraft() {
        let (store, alice) = seeded();
        store.apply_wallet_txn(&alice, "KES", 100, "topup", None).unwrap();

        let err = store
            .apply_wallet_txn(&alice, "KES", -200, "booking", None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)));
        // the failed attempt wrote nothing
        assert_eq!(store.wallet_txn_sum(&alice, "KES").unwrap(), 100);

        store.set_overdraft(&alice, "KES", true).unwrap();
        store.apply_wallet_txn(&alice, "KES", -200, "booking", None).unwrap();
        let wallet = store.get_wallet(&alice, "KES").unwrap().unwrap();
        assert_eq!(wallet.balance_minor, -100);
    }

    #[test]
    fn external_ref_is_idempotency_key() {
        let (store, alice) = seeded();
        store
            .apply_wallet_txn(&alice, "KES", 1000, "mpesa", Some("mpesa-tx-1"))
            .unwrap();
        let err = store
            .apply_wallet_txn(&alice, "KES", 1000, "mpesa", Some("mpesa-tx-1"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.wallet_txn_sum(&alice, "KES").unwrap(), 1000);
    }

    #[test]
    fn txn_listing_is_newest_first_and_capped() {
        let (store, alice) = seeded();
        for i in 0..5 {
            store
                .apply_wallet_txn(&alice, "KES", 100 + i, "topup", None)
                .unwrap();
        }
        let txns = store.wallet_txns(&alice, "KES", 3).unwrap();
        assert_eq!(txns.len(), 3);
        assert_eq!(txns[0].delta_minor, 104);
    }
}
