//! The assistant intent job: parse the utterance, route the intent, stream
//! the answer back into the originating room, persist the final assistant
//! message.
//!
//! Chunks for one correlation id arrive in generation order and always
//! precede `ai_message_saved`. A newer assistant request in the same room
//! cancels this one; clients then see a final system note instead of more
//! chunks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use mathia_core::config::AI_STREAM_CHUNK_BYTES;
use mathia_core::types::{MessageId, RoomId, UserId};
use mathia_intent::{IntentAction, IntentParser, ParserInput};
use mathia_jobs::{JobHandler, Outcome};
use mathia_llm::{CompletionRequest, Message, Mode, Role, StreamEvent};
use mathia_protocol::ServerFrame;

use mathia_connectors::{CallCtx, ResultStatus};

use crate::context::WorkerContext;

pub const ASSISTANT_JOB: &str = "assistant-intent";

#[derive(Debug, Deserialize)]
struct AssistantPayload {
    correlation_id: String,
    room: String,
    user: String,
    utterance: String,
}

pub struct AssistantJob<C: WorkerContext> {
    ctx: Arc<C>,
    parser: Arc<IntentParser>,
}

impl<C: WorkerContext> AssistantJob<C> {
    pub fn new(ctx: Arc<C>, parser: Arc<IntentParser>) -> Self {
        Self { ctx, parser }
    }

    async fn handle(&self, payload: AssistantPayload) {
        let room = RoomId::from(payload.room.clone());
        let user = UserId::from(payload.user.clone());
        let correlation = MessageId::from(payload.correlation_id.clone());

        let cancel = self.ctx.begin_correlation(&room, &correlation);

        // room context: summary (if any) plus the recent turns
        let room_context = self.render_room_context(&room);
        let input = ParserInput {
            utterance: &payload.utterance,
            room_context: &room_context,
            user_profile: "",
        };
        let action = self.parser.parse(&input, &cancel).await;
        info!(correlation_id = %correlation, kind = %action.kind(), "assistant intent parsed");

        let prompt = match &action {
            IntentAction::Chat { text } => {
                format!("The user said: {text}\n\nReply naturally and briefly.")
            }
            other => {
                let call_ctx = CallCtx {
                    user: user.clone(),
                    room: Some(room.clone()),
                    correlation_id: Some(correlation.clone()),
                    cancel: cancel.clone(),
                };
                let result = self.ctx.router().route(other, &call_ctx).await;
                render_result_prompt(&payload.utterance, other, &result)
            }
        };

        if cancel.is_cancelled() {
            self.note_cancelled(&room, &correlation).await;
            return;
        }

        let final_text = self
            .stream_reply(&room, &correlation, &room_context, &prompt, &cancel)
            .await;

        match final_text {
            Some(text) if !cancel.is_cancelled() => {
                match self.ctx.persist_assistant_message(&room, &text) {
                    Ok(view) => {
                        self.ctx
                            .broadcast(
                                &room,
                                ServerFrame::AiMessageSaved {
                                    correlation_id: correlation.clone(),
                                    message: view,
                                },
                            )
                            .await;
                    }
                    Err(e) => warn!(correlation_id = %correlation, err = %e, "failed to persist assistant message"),
                }
            }
            _ => {
                self.note_cancelled(&room, &correlation).await;
            }
        }

        self.ctx.end_correlation(&room, &correlation);
    }

    /// Drive the LLM stream, regrouping deltas into ≤ 2 KB chunks and
    /// broadcasting each as `ai_stream`. Returns the accumulated reply, or
    /// `None` when the stream failed or was cancelled mid-flight.
    async fn stream_reply(
        &self,
        room: &RoomId,
        correlation: &MessageId,
        room_context: &str,
        prompt: &str,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Option<String> {
        let req = CompletionRequest {
            model: self.ctx.model(),
            system: format!(
                "You are Mathia, the in-chat assistant. Be concise and helpful.\n\nRoom context:\n{room_context}"
            ),
            messages: vec![Message {
                role: Role::User,
                content: prompt.to_string(),
            }],
            max_tokens: 1024,
            temperature: 0.7,
            mode: Mode::Text,
        };

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let llm = self.ctx.llm().clone();
        let stream_cancel = cancel.clone();
        let stream_req = req.clone();
        let driver = tokio::spawn(async move {
            llm.complete_stream(&stream_req, tx, &stream_cancel).await
        });

        let mut full = String::new();
        let mut pending = String::new();
        let mut failed = false;
        let mut stream_done = false;

        while let Some(event) = rx.recv().await {
            if cancel.is_cancelled() {
                driver.abort();
                return None;
            }
            match event {
                StreamEvent::TextDelta { text } => {
                    full.push_str(&text);
                    pending.push_str(&text);
                    while pending.len() >= AI_STREAM_CHUNK_BYTES {
                        let chunk = take_chunk(&mut pending, AI_STREAM_CHUNK_BYTES);
                        self.ctx
                            .broadcast(
                                room,
                                ServerFrame::AiStream {
                                    correlation_id: correlation.clone(),
                                    chunk,
                                    is_final: false,
                                },
                            )
                            .await;
                    }
                }
                StreamEvent::Done { .. } => {
                    stream_done = true;
                    break;
                }
                StreamEvent::Error { message } => {
                    warn!(correlation_id = %correlation, %message, "assistant stream error");
                    failed = true;
                    break;
                }
            }
        }
        // the provider can also fail through its Result without emitting an
        // Error event (e.g. every retry exhausted before the first byte)
        match driver.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if !stream_done {
                    warn!(correlation_id = %correlation, err = %e, "assistant stream provider failed");
                    failed = true;
                }
            }
            Err(_) => failed = true,
        }

        if failed && full.is_empty() {
            // degraded but user-visible: the generic actionable message
            full = "I can't reach my brain right now — try again in a minute.".to_string();
            pending = full.clone();
        }

        // flush the tail as the final chunk
        self.ctx
            .broadcast(
                room,
                ServerFrame::AiStream {
                    correlation_id: correlation.clone(),
                    chunk: std::mem::take(&mut pending),
                    is_final: true,
                },
            )
            .await;

        Some(full)
    }

    async fn note_cancelled(&self, room: &RoomId, correlation: &MessageId) {
        info!(correlation_id = %correlation, "assistant correlation cancelled");
        if let Ok(view) = self
            .ctx
            .persist_system_message(room, "(assistant reply superseded by a newer request)")
        {
            self.ctx
                .broadcast(room, ServerFrame::NewMessage { message: view })
                .await;
        }
    }

    fn render_room_context(&self, room: &RoomId) -> String {
        let mut out = String::new();
        if let Ok(Some(record)) = self.ctx.store().get_room(room) {
            if let Some(summary) = record.summary {
                out.push_str("Summary of earlier conversation:\n");
                out.push_str(&summary);
                out.push_str("\n\n");
            }
        }
        if let Ok(recent) = self.ctx.recent_plaintext(room, 10) {
            for (_, sender, body) in recent {
                out.push_str(&format!("{sender}: {body}\n"));
            }
        }
        out
    }
}

#[async_trait]
impl<C: WorkerContext> JobHandler for AssistantJob<C> {
    async fn run(&self, payload: Value, _attempt: u32) -> Outcome {
        let parsed: AssistantPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(err = %e, "malformed assistant payload");
                return Outcome::Dead;
            }
        };
        self.handle(parsed).await;
        Outcome::Done
    }
}

/// Split off a ≤ `max` byte prefix on a char boundary.
fn take_chunk(buf: &mut String, max: usize) -> String {
    if buf.len() <= max {
        return std::mem::take(buf);
    }
    let mut cut = max;
    while !buf.is_char_boundary(cut) {
        cut -= 1;
    }
    let rest = buf.split_off(cut);
    std::mem::replace(buf, rest)
}

/// Build the summarization prompt from a connector envelope.
fn render_result_prompt(
    utterance: &str,
    action: &IntentAction,
    result: &mathia_connectors::ConnectorResult,
) -> String {
    match &result.status {
        ResultStatus::Ok | ResultStatus::Partial => format!(
            "The user asked: {utterance}\n\
             The {} call returned {} result(s):\n{}\n\n\
             Summarize this for the user in chat. Mention if the data came \
             from a fallback source.{}",
            action.kind(),
            result.count,
            serde_json::to_string_pretty(&result.results).unwrap_or_default(),
            if result.metadata.fallback_used {
                " (fallback_used=true)"
            } else {
                ""
            }
        ),
        ResultStatus::RateLimited { retry_after_secs } => format!(
            "The user asked: {utterance}\n\
             Tell them they've hit the usage limit for this and can retry in \
             about {retry_after_secs} seconds."
        ),
        ResultStatus::Unsupported { reason } => format!(
            "The user asked: {utterance}\n\
             That request couldn't be handled ({reason}). Explain briefly and \
             suggest what they could ask instead."
        ),
        ResultStatus::UpstreamFailure { .. } => format!(
            "The user asked: {utterance}\n\
             The {} provider is unreachable right now. Apologize and \
             suggest trying again in a minute.",
            action.kind()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_chunk_respects_char_boundaries() {
        let mut buf = "héllo wörld".repeat(300);
        let original = buf.clone();
        let mut chunks = Vec::new();
        while !buf.is_empty() {
            let chunk = take_chunk(&mut buf, AI_STREAM_CHUNK_BYTES);
            assert!(chunk.len() <= AI_STREAM_CHUNK_BYTES);
            chunks.push(chunk);
        }
        assert_eq!(chunks.concat(), original);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn take_chunk_small_buffer_drains() {
        let mut buf = "short".to_string();
        assert_eq!(take_chunk(&mut buf, 2048), "short");
        assert!(buf.is_empty());
    }
}
