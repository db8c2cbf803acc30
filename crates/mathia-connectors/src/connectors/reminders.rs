//! Reminder adapter: set, list, cancel. The scheduled dispatcher (worker
//! side) owns firing; this adapter only manages the rows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use mathia_intent::{ActionKind, IntentAction};
use mathia_store::Store;

use crate::connector::{CallCtx, Connector, ConnectorError, Payload};

/// A reminder must be due at least this far in the future.
const MIN_LEAD_SECS: i64 = 60;

pub struct ReminderConnector {
    store: Arc<Store>,
}

impl ReminderConnector {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Connector for ReminderConnector {
    fn name(&self) -> &str {
        "reminders"
    }

    fn supported_actions(&self) -> &[ActionKind] {
        &[
            ActionKind::SetReminder,
            ActionKind::ListReminders,
            ActionKind::CancelReminder,
        ]
    }

    // mutations and live listings — never cached
    fn ttl_for(&self, _action: &IntentAction) -> Duration {
        Duration::ZERO
    }

    async fn execute(
        &self,
        action: &IntentAction,
        ctx: &CallCtx,
    ) -> Result<Payload, ConnectorError> {
        match action {
            IntentAction::SetReminder {
                content,
                due_at,
                channel,
            } => {
                let due: DateTime<Utc> = DateTime::parse_from_rfc3339(due_at)
                    .map_err(|_| ConnectorError::Invalid("due_at: not ISO-8601".to_string()))?
                    .with_timezone(&Utc);
                if due < Utc::now() + chrono::Duration::seconds(MIN_LEAD_SECS) {
                    return Err(ConnectorError::Invalid(format!(
                        "due_at must be at least {MIN_LEAD_SECS}s in the future"
                    )));
                }

                let room = match &ctx.room {
                    Some(room) => room.clone(),
                    // reminders set outside a room land in the user's assistant room
                    None => self
                        .store
                        .ai_room_of(&ctx.user)
                        .map_err(|e| ConnectorError::Upstream(e.to_string()))?
                        .map(|r| r.id)
                        .ok_or_else(|| {
                            ConnectorError::Invalid("no room to deliver the reminder to".to_string())
                        })?,
                };

                let rec = self
                    .store
                    .create_reminder(&ctx.user, &room, content, due, *channel)
                    .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
                Ok(Payload::new(vec![json!({
                    "id": rec.id,
                    "content": rec.content,
                    "due_at": rec.due_at,
                    "channel": rec.channel,
                    "status": rec.status,
                })]))
            }
            IntentAction::ListReminders => {
                let rows = self
                    .store
                    .reminders_of(&ctx.user, 50)
                    .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
                let results = rows
                    .iter()
                    .map(|r| {
                        json!({
                            "id": r.id,
                            "content": r.content,
                            "due_at": r.due_at,
                            "channel": r.channel,
                            "status": r.status,
                        })
                    })
                    .collect();
                Ok(Payload::new(results))
            }
            IntentAction::CancelReminder { id } => {
                let canceled = self
                    .store
                    .cancel_reminder(id, &ctx.user)
                    .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
                if !canceled {
                    return Err(ConnectorError::Invalid(format!(
                        "reminder {id} is not pending or not yours"
                    )));
                }
                Ok(Payload::new(vec![json!({"id": id, "status": "canceled"})]))
            }
            other => Err(ConnectorError::Invalid(format!(
                "reminders cannot serve {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathia_core::types::{ReminderChannel, RoomKind, UserId};

    fn seeded() -> (ReminderConnector, UserId) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let alice = store.create_user("alice", "a@example.com", "pw").unwrap().id;
        store.create_room(RoomKind::Ai, "assistant", &alice).unwrap();
        (ReminderConnector::new(store), alice)
    }

    fn set_action(secs_ahead: i64) -> IntentAction {
        IntentAction::SetReminder {
            content: "standup".into(),
            due_at: (Utc::now() + chrono::Duration::seconds(secs_ahead)).to_rfc3339(),
            channel: ReminderChannel::Inapp,
        }
    }

    #[tokio::test]
    async fn set_list_cancel_round_trip() {
        let (conn, alice) = seeded();
        let ctx = CallCtx::new(alice);

        let set = conn.execute(&set_action(120), &ctx).await.unwrap();
        let id = set.results[0]["id"].as_str().unwrap().to_string();

        let list = conn.execute(&IntentAction::ListReminders, &ctx).await.unwrap();
        assert_eq!(list.results.len(), 1);

        conn.execute(&IntentAction::CancelReminder { id: id.clone() }, &ctx)
            .await
            .unwrap();
        // canceling again fails — the row is no longer pending
        assert!(conn
            .execute(&IntentAction::CancelReminder { id }, &ctx)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn due_at_must_be_a_minute_out() {
        let (conn, alice) = seeded();
        let ctx = CallCtx::new(alice);
        assert!(matches!(
            conn.execute(&set_action(30), &ctx).await,
            Err(ConnectorError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn cannot_cancel_another_users_reminder() {
        let (conn, alice) = seeded();
        let set = conn
            .execute(&set_action(120), &CallCtx::new(alice))
            .await
            .unwrap();
        let id = set.results[0]["id"].as_str().unwrap().to_string();

        assert!(conn
            .execute(
                &IntentAction::CancelReminder { id },
                &CallCtx::new("mallory".into())
            )
            .await
            .is_err());
    }
}
