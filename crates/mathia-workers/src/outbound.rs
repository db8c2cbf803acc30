//! Retry consumer for outbound messages the messaging connector queued
//! after an upstream failure. Idempotent by construction: the payload
//! carries the full action, and the send either lands or re-queues.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use mathia_connectors::CallCtx;
use mathia_intent::IntentAction;
use mathia_jobs::{JobHandler, Outcome};

use crate::context::WorkerContext;

pub const OUTBOUND_RETRY_JOB: &str = "outbound-message";

const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct OutboundPayload {
    user: String,
    action: IntentAction,
}

pub struct OutboundRetryJob<C: WorkerContext> {
    ctx: Arc<C>,
}

impl<C: WorkerContext> OutboundRetryJob<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<C: WorkerContext> JobHandler for OutboundRetryJob<C> {
    async fn run(&self, payload: Value, attempt: u32) -> Outcome {
        let parsed: OutboundPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(err = %e, "malformed outbound retry payload");
                return Outcome::Dead;
            }
        };

        // call the connector directly, not through route(): the dispatch
        // fallback would queue yet another retry job and chain forever
        let Some(connector) = self.ctx.router().connector_for(parsed.action.kind()).cloned()
        else {
            warn!(action = %parsed.action.kind(), "no connector for queued outbound message");
            return Outcome::Dead;
        };

        let call_ctx = CallCtx::new(parsed.user.as_str().into());
        match connector.execute(&parsed.action, &call_ctx).await {
            Ok(_) => {
                info!(action = %parsed.action.kind(), attempt, "queued outbound message delivered");
                Outcome::Done
            }
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(action = %parsed.action.kind(), attempt, err = %e, "outbound retry failed");
                Outcome::Retry {
                    delay: Duration::from_secs(60 * u64::from(attempt.max(1))),
                }
            }
            Err(e) => {
                warn!(action = %parsed.action.kind(), attempt, err = %e, "outbound message dead-lettered");
                Outcome::Dead
            }
        }
    }
}
