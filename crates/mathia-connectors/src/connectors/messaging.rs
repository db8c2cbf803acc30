//! Outbound messaging adapter (whatsapp + email). Sends are side effects:
//! results are never cached, a per-user daily quota applies on top of the
//! shared connector window, and transient upstream failures fall back to a
//! queued retry job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use mathia_cache::RateLimiter;
use mathia_intent::{ActionKind, IntentAction};
use mathia_jobs::{EnqueueOpts, JobQueue};

use crate::connector::{CallCtx, Connector, ConnectorError, Payload};

pub const RETRY_JOB: &str = "outbound-message";

pub struct MessagingConfig {
    pub whatsapp_base_url: Option<String>,
    pub whatsapp_token: Option<String>,
    pub mail_base_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub daily_quota: u32,
}

pub struct MessagingConnector {
    client: reqwest::Client,
    cfg: MessagingConfig,
    quota: Arc<RateLimiter>,
    jobs: JobQueue,
}

impl MessagingConnector {
    pub fn new(cfg: MessagingConfig, quota: Arc<RateLimiter>, jobs: JobQueue) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
            quota,
            jobs,
        }
    }

    fn take_quota(&self, user: &str) -> Result<(), ConnectorError> {
        let decision = self.quota.take(
            &format!("{user}|messaging-daily"),
            self.cfg.daily_quota,
            Duration::from_secs(86_400),
        );
        if !decision.allowed {
            return Err(ConnectorError::QuotaExceeded {
                retry_after_secs: decision.retry_after.as_secs().max(1),
            });
        }
        Ok(())
    }

    async fn send_whatsapp(&self, to: &str, body: &str) -> Result<(), ConnectorError> {
        let base = self.cfg.whatsapp_base_url.as_deref().ok_or_else(|| {
            ConnectorError::Upstream("whatsapp upstream not configured".to_string())
        })?;
        let token = self.cfg.whatsapp_token.as_deref().unwrap_or_default();

        let resp = self
            .client
            .post(format!("{base}/v1/messages"))
            .bearer_auth(token)
            .json(&json!({"to": to, "type": "text", "text": {"body": body}}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ConnectorError::Upstream(format!(
                "whatsapp send returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), ConnectorError> {
        let base = self
            .cfg
            .mail_base_url
            .as_deref()
            .ok_or_else(|| ConnectorError::Upstream("mail upstream not configured".to_string()))?;
        let key = self.cfg.mail_api_key.as_deref().unwrap_or_default();

        let resp = self
            .client
            .post(format!("{base}/v3/messages"))
            .basic_auth("api", Some(key))
            .form(&[("to", to), ("subject", subject), ("text", body)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ConnectorError::Upstream(format!(
                "mail send returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for MessagingConnector {
    fn name(&self) -> &str {
        "messaging"
    }

    fn supported_actions(&self) -> &[ActionKind] {
        &[ActionKind::SendWhatsapp, ActionKind::SendEmail]
    }

    // sends are side effects, never cached
    fn ttl_for(&self, _action: &IntentAction) -> Duration {
        Duration::ZERO
    }

    async fn execute(
        &self,
        action: &IntentAction,
        ctx: &CallCtx,
    ) -> Result<Payload, ConnectorError> {
        self.take_quota(ctx.user.as_str())?;

        match action {
            IntentAction::SendWhatsapp { to, body } => {
                self.send_whatsapp(to, body).await?;
                Ok(Payload::new(vec![json!({"to": to, "delivered": true})]).with_cost("metered"))
            }
            IntentAction::SendEmail { to, subject, body } => {
                self.send_email(to, subject, body).await?;
                Ok(Payload::new(vec![json!({"to": to, "delivered": true})]).with_cost("metered"))
            }
            other => Err(ConnectorError::Invalid(format!(
                "messaging cannot serve {}",
                other.kind()
            ))),
        }
    }

    /// Queue-for-retry: the send did not happen now, but a job will try
    /// again. Surfaced as a partial outcome, never cached.
    async fn fallback(&self, action: &IntentAction, ctx: &CallCtx) -> Option<Payload> {
        let payload = json!({
            "user": ctx.user,
            "action": action,
        });
        let enqueued = self
            .jobs
            .enqueue(
                RETRY_JOB,
                payload,
                EnqueueOpts {
                    delay: Some(Duration::from_secs(60)),
                    ..Default::default()
                },
            )
            .ok()?;
        let job_id = enqueued.map(|j| j.id)?;

        info!(job_id = %job_id, "outbound message queued for retry");
        Some(Payload::new(vec![json!({"queued": true, "job_id": job_id})]).partial())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn connector(daily_quota: u32) -> MessagingConnector {
        MessagingConnector::new(
            MessagingConfig {
                whatsapp_base_url: None,
                whatsapp_token: None,
                mail_base_url: None,
                mail_api_key: None,
                daily_quota,
            },
            Arc::new(RateLimiter::new()),
            JobQueue::new(Connection::open_in_memory().unwrap()).unwrap(),
        )
    }

    fn whatsapp() -> IntentAction {
        IntentAction::SendWhatsapp {
            to: "+254700000001".into(),
            body: "hello".into(),
        }
    }

    #[tokio::test]
    async fn daily_quota_is_enforced() {
        let conn = connector(1);
        let ctx = CallCtx::new("alice".into());

        // first call passes the quota gate and fails on the (unconfigured)
        // upstream; the second is stopped by the quota itself
        assert!(matches!(
            conn.execute(&whatsapp(), &ctx).await,
            Err(ConnectorError::Upstream(_))
        ));
        assert!(matches!(
            conn.execute(&whatsapp(), &ctx).await,
            Err(ConnectorError::QuotaExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn fallback_queues_a_retry_job() {
        let conn = connector(10);
        let ctx = CallCtx::new("alice".into());
        let payload = conn.fallback(&whatsapp(), &ctx).await.unwrap();
        assert!(payload.partial);
        assert_eq!(payload.results[0]["queued"], true);
    }
}
