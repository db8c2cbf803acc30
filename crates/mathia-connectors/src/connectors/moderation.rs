//! Moderation adapter: text classification into allow / flag / block.
//!
//! When the classifier upstream is down, messages are allowed — blocking
//! chat on a moderation outage is the worse failure — and the pipeline
//! still records the upstream_failure via `fallback_used`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use mathia_cache::Scope;
use mathia_intent::{ActionKind, IntentAction};

use crate::connector::{CallCtx, Connector, ConnectorError, Payload};

pub struct ModerationConnector {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl ModerationConnector {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Connector for ModerationConnector {
    fn name(&self) -> &str {
        "moderation"
    }

    fn supported_actions(&self) -> &[ActionKind] {
        &[ActionKind::ClassifyText]
    }

    fn scope(&self, _action: ActionKind) -> Scope {
        Scope::Public
    }

    // verdicts are re-evaluated every pass
    fn ttl_for(&self, _action: &IntentAction) -> Duration {
        Duration::ZERO
    }

    async fn execute(
        &self,
        action: &IntentAction,
        _ctx: &CallCtx,
    ) -> Result<Payload, ConnectorError> {
        let IntentAction::ClassifyText { text } = action else {
            return Err(ConnectorError::Invalid(format!(
                "moderation cannot serve {}",
                action.kind()
            )));
        };

        let base = self.base_url.as_deref().ok_or_else(|| {
            ConnectorError::Upstream("moderation upstream not configured".to_string())
        })?;

        let resp = self
            .client
            .post(format!("{base}/v1/classify"))
            .json(&json!({"text": text}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ConnectorError::Upstream(format!(
                "classifier returned {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
        let verdict = body.get("action").and_then(|a| a.as_str()).unwrap_or("allow");
        if !matches!(verdict, "allow" | "flag" | "block") {
            return Err(ConnectorError::Upstream(format!(
                "classifier returned unknown verdict '{verdict}'"
            )));
        }
        let reason = body
            .get("reason")
            .and_then(|r| r.as_str())
            .unwrap_or_default();
        Ok(Payload::new(vec![
            json!({"action": verdict, "reason": reason}),
        ]))
    }

    async fn fallback(&self, _action: &IntentAction, _ctx: &CallCtx) -> Option<Payload> {
        Some(Payload::new(vec![json!({
            "action": "allow",
            "reason": "classifier unavailable",
        })]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_when_classifier_is_down() {
        let conn = ModerationConnector::new(None);
        let action = IntentAction::ClassifyText {
            text: "hello".into(),
        };
        let ctx = CallCtx::new("alice".into());

        assert!(conn.execute(&action, &ctx).await.is_err());
        let payload = conn.fallback(&action, &ctx).await.unwrap();
        assert_eq!(payload.results[0]["action"], "allow");
    }
}
