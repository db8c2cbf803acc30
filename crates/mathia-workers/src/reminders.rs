//! Reminder dispatcher — runs on the 60 s periodic tick.
//!
//! Each due reminder is claimed with a conditional status flip, so a
//! reminder is delivered at most once per tick even with concurrent
//! dispatchers. Transient delivery failures reschedule with 1/5/30-minute
//! backoff; the third failed attempt is terminal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use mathia_connectors::{CallCtx, ResultStatus};
use mathia_core::types::ReminderChannel;
use mathia_intent::IntentAction;
use mathia_jobs::{JobHandler, Outcome};
use mathia_protocol::ServerFrame;
use mathia_store::ReminderRecord;

use crate::context::WorkerContext;

pub const REMINDER_DISPATCH_JOB: &str = "reminder-dispatch";

const MAX_ATTEMPTS: u32 = 3;
const BATCH: usize = 50;

pub struct ReminderDispatchJob<C: WorkerContext> {
    ctx: Arc<C>,
}

impl<C: WorkerContext> ReminderDispatchJob<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }

    async fn tick(&self) {
        let now = Utc::now();
        let due = match self.ctx.store().due_reminders(now, BATCH) {
            Ok(d) => d,
            Err(e) => {
                warn!(err = %e, "due-reminder query failed");
                return;
            }
        };

        for reminder in due {
            // the claim is the idempotency gate — losing it means another
            // dispatcher owns this row
            match self.ctx.store().claim_reminder(&reminder.id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(reminder_id = %reminder.id, err = %e, "claim failed");
                    continue;
                }
            }
            self.dispatch(reminder).await;
        }
    }

    async fn dispatch(&self, reminder: ReminderRecord) {
        let delivered = match reminder.channel {
            ReminderChannel::Inapp => self.deliver_inapp(&reminder).await,
            ReminderChannel::Email => self.deliver_email(&reminder).await,
            ReminderChannel::Whatsapp => self.deliver_whatsapp(&reminder).await,
            // sequential, email first; one success is enough
            ReminderChannel::Both => {
                let email = self.deliver_email(&reminder).await;
                let whatsapp = self.deliver_whatsapp(&reminder).await;
                email || whatsapp
            }
        };

        // attempts was bumped by the claim
        let attempt = self
            .ctx
            .store()
            .get_reminder(&reminder.id)
            .ok()
            .flatten()
            .map(|r| r.attempts)
            .unwrap_or(reminder.attempts + 1);

        if delivered {
            if let Err(e) = self.ctx.store().mark_reminder_fired(&reminder.id) {
                warn!(reminder_id = %reminder.id, err = %e, "fired transition failed");
            } else {
                info!(reminder_id = %reminder.id, attempt, "reminder fired");
            }
            return;
        }

        if attempt >= MAX_ATTEMPTS {
            warn!(reminder_id = %reminder.id, attempt, "reminder failed permanently");
            if let Err(e) = self.ctx.store().mark_reminder_failed(&reminder.id) {
                warn!(reminder_id = %reminder.id, err = %e, "failed transition failed");
            }
            return;
        }

        let delay = retry_backoff(attempt);
        info!(reminder_id = %reminder.id, attempt, delay_mins = delay.num_minutes(), "reminder rescheduled");
        if let Err(e) = self
            .ctx
            .store()
            .reschedule_reminder(&reminder.id, Utc::now() + delay)
        {
            warn!(reminder_id = %reminder.id, err = %e, "reschedule failed");
        }
    }

    async fn deliver_inapp(&self, reminder: &ReminderRecord) -> bool {
        match self
            .ctx
            .persist_system_message(&reminder.room_id, &format!("⏰ Reminder: {}", reminder.content))
        {
            Ok(view) => {
                self.ctx
                    .broadcast(&reminder.room_id, ServerFrame::NewMessage { message: view })
                    .await;
                true
            }
            Err(e) => {
                warn!(reminder_id = %reminder.id, err = %e, "inapp delivery failed");
                false
            }
        }
    }

    async fn deliver_email(&self, reminder: &ReminderRecord) -> bool {
        let Ok(Some(user)) = self.ctx.store().get_user(&reminder.user_id) else {
            return false;
        };
        let action = IntentAction::SendEmail {
            to: user.email,
            subject: "Reminder from Mathia".to_string(),
            body: reminder.content.clone(),
        };
        self.route_send(reminder, action).await
    }

    async fn deliver_whatsapp(&self, reminder: &ReminderRecord) -> bool {
        let Some(number) = self.ctx.whatsapp_number(&reminder.user_id) else {
            warn!(reminder_id = %reminder.id, "no linked whatsapp number");
            return false;
        };
        let action = IntentAction::SendWhatsapp {
            to: number,
            body: format!("⏰ Reminder: {}", reminder.content),
        };
        self.route_send(reminder, action).await
    }

    async fn route_send(&self, reminder: &ReminderRecord, action: IntentAction) -> bool {
        let ctx = CallCtx {
            user: reminder.user_id.clone(),
            room: Some(reminder.room_id.clone()),
            correlation_id: None,
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let result = self.ctx.router().route(&action, &ctx).await;
        // a queued-for-retry send (Partial) still reaches the user
        matches!(result.status, ResultStatus::Ok | ResultStatus::Partial)
    }
}

/// 1, 5, 30 minutes for attempts 1, 2, 3.
fn retry_backoff(attempt: u32) -> Duration {
    match attempt {
        0 | 1 => Duration::minutes(1),
        2 => Duration::minutes(5),
        _ => Duration::minutes(30),
    }
}

#[async_trait]
impl<C: WorkerContext> JobHandler for ReminderDispatchJob<C> {
    async fn run(&self, _payload: Value, _attempt: u32) -> Outcome {
        self.tick().await;
        Outcome::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder() {
        assert_eq!(retry_backoff(1), Duration::minutes(1));
        assert_eq!(retry_backoff(2), Duration::minutes(5));
        assert_eq!(retry_backoff(3), Duration::minutes(30));
    }
}
