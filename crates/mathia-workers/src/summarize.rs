//! Context summarizer — runs on the 900 s periodic tick.
//!
//! Compresses a busy room's recent history into a short summary stored on
//! the room row, which the assistant pipeline injects as LLM context.
//! Messages are read-only here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mathia_jobs::{JobHandler, Outcome};
use mathia_llm::{CompletionRequest, Message, Mode, Role};

use crate::context::WorkerContext;

pub const SUMMARIZE_JOB: &str = "context-summarize";

const ROOM_BATCH: usize = 5;
/// Rooms with fewer recent turns than this are not worth compressing.
const MIN_TURNS: usize = 20;

pub struct SummarizeJob<C: WorkerContext> {
    ctx: Arc<C>,
}

impl<C: WorkerContext> SummarizeJob<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }

    async fn pass(&self) {
        let since = (Utc::now() - Duration::hours(6)).to_rfc3339();
        let rooms = match self.ctx.store().rooms_with_recent_messages(&since, ROOM_BATCH) {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(err = %e, "summary target query failed");
                return;
            }
        };

        for room in rooms {
            let turns = match self.ctx.recent_plaintext(&room, 200) {
                Ok(t) => t,
                Err(e) => {
                    warn!(room_id = %room, err = %e, "summary decrypt failed");
                    continue;
                }
            };
            if turns.len() < MIN_TURNS {
                continue;
            }

            let transcript: String = turns
                .iter()
                .map(|(_, sender, body)| format!("{sender}: {body}\n"))
                .collect();

            let req = CompletionRequest {
                model: self.ctx.model(),
                system: "You compress chat transcripts into dense context summaries."
                    .to_string(),
                messages: vec![Message {
                    role: Role::User,
                    content: format!(
                        "Summarize this conversation in at most 10 sentences, keeping \
                         names, decisions, and open questions:\n\n{transcript}"
                    ),
                }],
                max_tokens: 512,
                temperature: 0.0,
                mode: Mode::Text,
            };

            let summary = match self
                .ctx
                .llm()
                .complete(&req, &CancellationToken::new())
                .await
            {
                Ok(resp) => resp.content,
                Err(e) => {
                    warn!(room_id = %room, err = %e, "summary LLM call failed");
                    continue;
                }
            };

            if let Err(e) = self.ctx.store().set_room_summary(&room, &summary) {
                warn!(room_id = %room, err = %e, "summary write failed");
            } else {
                info!(room_id = %room, turns = turns.len(), "room summary refreshed");
            }
        }
    }
}

#[async_trait]
impl<C: WorkerContext> JobHandler for SummarizeJob<C> {
    async fn run(&self, _payload: Value, _attempt: u32) -> Outcome {
        self.pass().await;
        Outcome::Done
    }
}
