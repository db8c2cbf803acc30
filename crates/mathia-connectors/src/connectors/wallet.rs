//! Wallet read adapter. Strictly read-only: chat can inspect balances and
//! recent transactions, never move money.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use mathia_intent::{ActionKind, IntentAction};
use mathia_store::Store;

use crate::connector::{CallCtx, Connector, ConnectorError, Payload};

const DEFAULT_CURRENCY: &str = "KES";
const DEFAULT_TXN_LIMIT: usize = 10;
const MAX_TXN_LIMIT: usize = 20;

pub struct WalletConnector {
    store: Arc<Store>,
}

impl WalletConnector {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Connector for WalletConnector {
    fn name(&self) -> &str {
        "wallet"
    }

    fn supported_actions(&self) -> &[ActionKind] {
        &[ActionKind::WalletBalance, ActionKind::ListWalletTxns]
    }

    // balances change with every txn; keep the cache window short
    fn ttl_for(&self, _action: &IntentAction) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(
        &self,
        action: &IntentAction,
        ctx: &CallCtx,
    ) -> Result<Payload, ConnectorError> {
        match action {
            IntentAction::WalletBalance { currency } => {
                let currency = currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
                let wallet = self
                    .store
                    .get_wallet(&ctx.user, currency)
                    .map_err(|e| ConnectorError::Upstream(e.to_string()))?;

                let (balance, updated_at) = match wallet {
                    Some(w) => (w.balance_minor, Some(w.updated_at)),
                    None => (0, None),
                };
                Ok(Payload::new(vec![json!({
                    "currency": currency,
                    "balance_minor": balance,
                    "updated_at": updated_at,
                })])
                .with_cost("free"))
            }
            IntentAction::ListWalletTxns { limit } => {
                let limit = limit
                    .map(|l| l as usize)
                    .unwrap_or(DEFAULT_TXN_LIMIT)
                    .min(MAX_TXN_LIMIT);
                let txns = self
                    .store
                    .wallet_txns(&ctx.user, DEFAULT_CURRENCY, limit)
                    .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
                let results = txns
                    .iter()
                    .map(|t| {
                        json!({
                            "id": t.id,
                            "delta_minor": t.delta_minor,
                            "reason": t.reason,
                            "created_at": t.created_at,
                        })
                    })
                    .collect();
                Ok(Payload::new(results).with_cost("free"))
            }
            other => Err(ConnectorError::Invalid(format!(
                "wallet cannot serve {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathia_core::types::UserId;

    fn seeded() -> (WalletConnector, UserId) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        store.apply_wallet_txn(&alice, "KES", 5000, "topup", None).unwrap();
        store.apply_wallet_txn(&alice, "KES", -1500, "booking", None).unwrap();
        (WalletConnector::new(store), alice)
    }

    #[tokio::test]
    async fn balance_reflects_txn_sum() {
        let (conn, alice) = seeded();
        let payload = conn
            .execute(
                &IntentAction::WalletBalance { currency: None },
                &CallCtx::new(alice),
            )
            .await
            .unwrap();
        assert_eq!(payload.results[0]["balance_minor"], 3500);
    }

    #[tokio::test]
    async fn missing_wallet_reads_as_zero() {
        let (conn, _) = seeded();
        let payload = conn
            .execute(
                &IntentAction::WalletBalance { currency: None },
                &CallCtx::new("stranger".into()),
            )
            .await
            .unwrap();
        assert_eq!(payload.results[0]["balance_minor"], 0);
    }

    #[tokio::test]
    async fn txn_list_is_capped() {
        let (conn, alice) = seeded();
        let payload = conn
            .execute(
                &IntentAction::ListWalletTxns { limit: Some(1) },
                &CallCtx::new(alice),
            )
            .await
            .unwrap();
        assert_eq!(payload.results.len(), 1);
        // newest first
        assert_eq!(payload.results[0]["delta_minor"], -1500);
    }
}
