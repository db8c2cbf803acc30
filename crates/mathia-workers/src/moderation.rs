//! Moderation pass — runs on the 300 s periodic tick.
//!
//! Batches recent messages from the busiest rooms through the moderation
//! connector. A `flag` verdict sets the moderated flag; a `block` verdict
//! also soft-deletes the message. Either way the room is notified.
//! Messages themselves are never edited.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use mathia_connectors::{CallCtx, ResultStatus};
use mathia_intent::IntentAction;
use mathia_jobs::{JobHandler, Outcome};
use mathia_protocol::ServerFrame;

use crate::context::WorkerContext;

pub const MODERATION_JOB: &str = "moderation-batch";

const ROOM_BATCH: usize = 10;
const MESSAGES_PER_ROOM: usize = 25;

pub struct ModerationPassJob<C: WorkerContext> {
    ctx: Arc<C>,
}

impl<C: WorkerContext> ModerationPassJob<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }

    async fn pass(&self) {
        let since = (Utc::now() - Duration::minutes(10)).to_rfc3339();
        let rooms = match self.ctx.store().rooms_with_recent_messages(&since, ROOM_BATCH) {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(err = %e, "moderation target query failed");
                return;
            }
        };

        for room in rooms {
            let recent = match self.ctx.recent_plaintext(&room, MESSAGES_PER_ROOM) {
                Ok(r) => r,
                Err(e) => {
                    warn!(room_id = %room, err = %e, "moderation decrypt failed");
                    continue;
                }
            };

            for (message_id, sender, body) in recent {
                let call_ctx = CallCtx {
                    user: sender.clone(),
                    room: Some(room.clone()),
                    correlation_id: None,
                    cancel: tokio_util::sync::CancellationToken::new(),
                };
                let result = self
                    .ctx
                    .router()
                    .route(&IntentAction::ClassifyText { text: body }, &call_ctx)
                    .await;

                if !matches!(result.status, ResultStatus::Ok | ResultStatus::Partial) {
                    continue;
                }
                let verdict = result.results.first();
                let action = verdict
                    .and_then(|v| v.get("action"))
                    .and_then(|a| a.as_str())
                    .unwrap_or("allow");
                if action == "allow" {
                    continue;
                }

                info!(message_id = %message_id, room_id = %room, verdict = action, "message moderated");
                if let Err(e) = self.ctx.store().mark_moderated(&message_id) {
                    warn!(message_id = %message_id, err = %e, "moderated flag update failed");
                    continue;
                }
                if action == "block" {
                    let _ = self.ctx.store().soft_delete_message(&message_id);
                }

                let reason = verdict
                    .and_then(|v| v.get("reason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or("policy violation");
                if let Ok(view) = self.ctx.persist_system_message(
                    &room,
                    &format!("A message was {action}ed by moderation: {reason}"),
                ) {
                    self.ctx
                        .broadcast(&room, ServerFrame::NewMessage { message: view })
                        .await;
                }
            }
        }
    }
}

#[async_trait]
impl<C: WorkerContext> JobHandler for ModerationPassJob<C> {
    async fn run(&self, _payload: Value, _attempt: u32) -> Outcome {
        self.pass().await;
        Outcome::Done
    }
}
