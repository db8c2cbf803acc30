//! Calendar adapter: event listing via the scheduling upstream, plus
//! booking-link resolution. No fallback — calendar failures are surfaced.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use mathia_intent::{ActionKind, IntentAction};
use mathia_store::Store;

use crate::connector::{CallCtx, Connector, ConnectorError, Payload};

pub struct CalendarConnector {
    client: reqwest::Client,
    base_url: Option<String>,
    store: Arc<Store>,
    /// User ids allowed to resolve booking links for other users.
    admins: Vec<String>,
}

impl CalendarConnector {
    pub fn new(base_url: Option<String>, store: Arc<Store>, admins: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            store,
            admins,
        }
    }
}

#[async_trait]
impl Connector for CalendarConnector {
    fn name(&self) -> &str {
        "calendar"
    }

    fn supported_actions(&self) -> &[ActionKind] {
        &[ActionKind::ListCalendarEvents, ActionKind::BookingLinkOf]
    }

    fn ttl_for(&self, action: &IntentAction) -> Duration {
        match action {
            // booking links are stable
            IntentAction::BookingLinkOf { .. } => Duration::from_secs(3600),
            _ => Duration::from_secs(300),
        }
    }

    async fn execute(
        &self,
        action: &IntentAction,
        ctx: &CallCtx,
    ) -> Result<Payload, ConnectorError> {
        match action {
            IntentAction::ListCalendarEvents => {
                let base = self.base_url.as_deref().ok_or_else(|| {
                    ConnectorError::Upstream("calendar upstream not configured".to_string())
                })?;
                let resp = self
                    .client
                    .get(format!("{base}/v1/users/{}/events", ctx.user))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(ConnectorError::Upstream(format!(
                        "calendar returned {}",
                        resp.status()
                    )));
                }
                let body: Value = resp
                    .json()
                    .await
                    .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
                let events = body
                    .get("events")
                    .and_then(|e| e.as_array())
                    .cloned()
                    .unwrap_or_default();
                Ok(Payload::new(events))
            }
            IntentAction::BookingLinkOf { target_user } => {
                // only the target themself or an admin may resolve a link
                if ctx.user.as_str() != target_user
                    && !self.admins.iter().any(|a| a == ctx.user.as_str())
                {
                    return Err(ConnectorError::Forbidden(
                        "booking links are private to their owner".to_string(),
                    ));
                }

                let user = self
                    .store
                    .get_user(&target_user.as_str().into())
                    .map_err(|e| ConnectorError::Upstream(e.to_string()))?
                    .ok_or_else(|| {
                        ConnectorError::Invalid(format!("unknown user {target_user}"))
                    })?;
                Ok(Payload::new(vec![json!({
                    "user": target_user,
                    "booking_link": format!("https://book.mathia.app/{}", user.username),
                })]))
            }
            other => Err(ConnectorError::Invalid(format!(
                "calendar cannot serve {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathia_core::types::UserId;

    fn seeded(admins: Vec<String>) -> (CalendarConnector, UserId) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        (CalendarConnector::new(None, store, admins), alice)
    }

    #[tokio::test]
    async fn own_booking_link_resolves() {
        let (conn, alice) = seeded(Vec::new());
        let payload = conn
            .execute(
                &IntentAction::BookingLinkOf {
                    target_user: alice.to_string(),
                },
                &CallCtx::new(alice),
            )
            .await
            .unwrap();
        assert_eq!(
            payload.results[0]["booking_link"],
            "https://book.mathia.app/alice"
        );
    }

    #[tokio::test]
    async fn strangers_are_forbidden() {
        let (conn, alice) = seeded(Vec::new());
        let res = conn
            .execute(
                &IntentAction::BookingLinkOf {
                    target_user: alice.to_string(),
                },
                &CallCtx::new("eve".into()),
            )
            .await;
        assert!(matches!(res, Err(ConnectorError::Forbidden(_))));
    }

    #[tokio::test]
    async fn admins_may_resolve_for_others() {
        let (conn, alice) = seeded(vec!["admin-1".to_string()]);
        let payload = conn
            .execute(
                &IntentAction::BookingLinkOf {
                    target_user: alice.to_string(),
                },
                &CallCtx::new("admin-1".into()),
            )
            .await
            .unwrap();
        assert_eq!(payload.results.len(), 1);
    }
}
