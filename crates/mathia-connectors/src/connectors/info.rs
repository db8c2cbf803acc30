//! Public-data adapter: weather, currency, gifs, web search. No user
//! scoping; when an upstream fails the adapter answers with its last good
//! value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mathia_cache::{canonical_json, Scope, TtlCache};
use mathia_intent::{ActionKind, IntentAction};

use crate::connector::{CallCtx, Connector, ConnectorError, Payload};

/// Last-good values are kept a day; better a stale forecast than none.
const LAST_GOOD_TTL: Duration = Duration::from_secs(86_400);

pub struct InfoConfig {
    pub weather_base_url: Option<String>,
    pub currency_base_url: Option<String>,
    pub gif_base_url: Option<String>,
    pub gif_api_key: Option<String>,
    pub websearch_base_url: Option<String>,
}

pub struct InfoConnector {
    client: reqwest::Client,
    cfg: InfoConfig,
    last_good: Arc<TtlCache>,
}

impl InfoConnector {
    pub fn new(cfg: InfoConfig, last_good: Arc<TtlCache>) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
            last_good,
        }
    }

    fn last_good_key(action: &IntentAction) -> String {
        format!(
            "lastgood|{}|{}",
            action.kind(),
            canonical_json(&action.params())
        )
    }

    async fn fetch(&self, url: String) -> Result<Vec<Value>, ConnectorError> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ConnectorError::Upstream(format!(
                "upstream returned {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
        Ok(match body {
            Value::Array(items) => items,
            other => vec![other],
        })
    }

    fn url_for(&self, action: &IntentAction) -> Result<String, ConnectorError> {
        let missing = |what: &str| ConnectorError::Upstream(format!("{what} upstream not configured"));
        match action {
            IntentAction::GetWeather { city } => {
                let base = self.cfg.weather_base_url.as_deref().ok_or_else(|| missing("weather"))?;
                Ok(format!("{base}/v1/current?city={city}"))
            }
            IntentAction::GetCurrency { from, to, amount } => {
                let base = self
                    .cfg
                    .currency_base_url
                    .as_deref()
                    .ok_or_else(|| missing("currency"))?;
                let amount = amount.unwrap_or(1.0);
                Ok(format!("{base}/v1/convert?from={from}&to={to}&amount={amount}"))
            }
            IntentAction::GetGif { query } => {
                let base = self.cfg.gif_base_url.as_deref().ok_or_else(|| missing("gif"))?;
                let key = self.cfg.gif_api_key.as_deref().unwrap_or_default();
                Ok(format!("{base}/v1/search?q={query}&api_key={key}&limit=1"))
            }
            IntentAction::WebSearch { query } => {
                let base = self
                    .cfg
                    .websearch_base_url
                    .as_deref()
                    .ok_or_else(|| missing("websearch"))?;
                Ok(format!("{base}/v1/search?q={query}&count=5"))
            }
            other => Err(ConnectorError::Invalid(format!(
                "info cannot serve {}",
                other.kind()
            ))),
        }
    }
}

#[async_trait]
impl Connector for InfoConnector {
    fn name(&self) -> &str {
        "info"
    }

    fn supported_actions(&self) -> &[ActionKind] {
        &[
            ActionKind::GetWeather,
            ActionKind::GetCurrency,
            ActionKind::GetGif,
            ActionKind::WebSearch,
        ]
    }

    fn scope(&self, _action: ActionKind) -> Scope {
        Scope::Public
    }

    fn ttl_for(&self, action: &IntentAction) -> Duration {
        match action {
            // exchange rates move faster than forecasts
            IntentAction::GetCurrency { .. } => Duration::from_secs(300),
            IntentAction::WebSearch { .. } => Duration::from_secs(600),
            _ => Duration::from_secs(1800),
        }
    }

    async fn execute(
        &self,
        action: &IntentAction,
        _ctx: &CallCtx,
    ) -> Result<Payload, ConnectorError> {
        let url = self.url_for(action)?;
        let results = self.fetch(url).await?;

        self.last_good.set(
            &Self::last_good_key(action),
            Value::Array(results.clone()),
            LAST_GOOD_TTL,
        );
        Ok(Payload::new(results).with_cost("free"))
    }

    async fn fallback(&self, action: &IntentAction, _ctx: &CallCtx) -> Option<Payload> {
        let value = self.last_good.get(&Self::last_good_key(action))?;
        let results = value.as_array().cloned()?;
        Some(Payload::new(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connector() -> InfoConnector {
        InfoConnector::new(
            InfoConfig {
                weather_base_url: None,
                currency_base_url: None,
                gif_base_url: None,
                gif_api_key: None,
                websearch_base_url: None,
            },
            Arc::new(TtlCache::new()),
        )
    }

    fn weather() -> IntentAction {
        IntentAction::GetWeather {
            city: "Nairobi".into(),
        }
    }

    #[tokio::test]
    async fn no_last_good_means_no_fallback() {
        let conn = connector();
        assert!(conn
            .fallback(&weather(), &CallCtx::new("alice".into()))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn last_good_value_serves_fallback() {
        let conn = connector();
        conn.last_good.set(
            &InfoConnector::last_good_key(&weather()),
            json!([{"temp_c": 24}]),
            LAST_GOOD_TTL,
        );
        let payload = conn
            .fallback(&weather(), &CallCtx::new("alice".into()))
            .await
            .unwrap();
        assert_eq!(payload.results[0]["temp_c"], 24);
        assert!(!payload.partial);
    }

    #[test]
    fn last_good_keys_distinguish_params() {
        let a = InfoConnector::last_good_key(&weather());
        let b = InfoConnector::last_good_key(&IntentAction::GetWeather {
            city: "Mombasa".into(),
        });
        assert_ne!(a, b);
    }
}
