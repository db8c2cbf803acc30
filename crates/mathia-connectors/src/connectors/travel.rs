//! Travel search adapter: buses, hotels, flights, transfers, events.
//!
//! When the upstream aggregator is unreachable the adapter answers from a
//! curated static dataset covering the major routes, marked
//! `fallback_used` by the pipeline.

use async_trait::async_trait;
use serde_json::{json, Value};

use mathia_cache::Scope;
use mathia_intent::{ActionKind, IntentAction};

use crate::connector::{CallCtx, Connector, ConnectorError, Payload};

pub struct TravelConnector {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl TravelConnector {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn search(&self, path: &str, params: Value) -> Result<Payload, ConnectorError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| ConnectorError::Upstream("travel upstream not configured".to_string()))?;

        let resp = self
            .client
            .post(format!("{base}/v1/search/{path}"))
            .json(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ConnectorError::Upstream(format!(
                "travel search returned {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ConnectorError::Upstream(e.to_string()))?;
        let results = body
            .get("results")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(Payload::new(results).with_cost("metered"))
    }
}

#[async_trait]
impl Connector for TravelConnector {
    fn name(&self) -> &str {
        "travel"
    }

    fn supported_actions(&self) -> &[ActionKind] {
        &[
            ActionKind::SearchBuses,
            ActionKind::SearchHotels,
            ActionKind::SearchFlights,
            ActionKind::SearchTransfers,
            ActionKind::SearchEvents,
        ]
    }

    // search results are the same for every user
    fn scope(&self, _action: ActionKind) -> Scope {
        Scope::Public
    }

    async fn execute(
        &self,
        action: &IntentAction,
        _ctx: &CallCtx,
    ) -> Result<Payload, ConnectorError> {
        match action {
            IntentAction::SearchBuses { .. } => self.search("buses", action.params()).await,
            IntentAction::SearchHotels { .. } => self.search("hotels", action.params()).await,
            IntentAction::SearchFlights { .. } => self.search("flights", action.params()).await,
            IntentAction::SearchTransfers { .. } => self.search("transfers", action.params()).await,
            IntentAction::SearchEvents { .. } => self.search("events", action.params()).await,
            other => Err(ConnectorError::Invalid(format!(
                "travel cannot serve {}",
                other.kind()
            ))),
        }
    }

    async fn fallback(&self, action: &IntentAction, _ctx: &CallCtx) -> Option<Payload> {
        let results = match action {
            IntentAction::SearchBuses {
                origin,
                destination,
                date,
                ..
            } => curated_routes(origin, destination)
                .into_iter()
                .map(|r| {
                    json!({
                        "operator": r.bus_operator,
                        "origin": r.origin,
                        "destination": r.destination,
                        "date": date,
                        "departure": "08:00",
                        "fare_minor": r.bus_fare_minor,
                        "currency": "KES",
                    })
                })
                .collect::<Vec<_>>(),
            IntentAction::SearchFlights {
                origin,
                destination,
                date,
                ..
            } => curated_routes(origin, destination)
                .into_iter()
                .filter(|r| r.flight_carrier.is_some())
                .map(|r| {
                    json!({
                        "carrier": r.flight_carrier,
                        "origin": r.origin,
                        "destination": r.destination,
                        "date": date,
                        "departure": "10:30",
                        "fare_minor": r.flight_fare_minor,
                        "currency": "KES",
                    })
                })
                .collect::<Vec<_>>(),
            IntentAction::SearchHotels { destination, .. } => CURATED
                .iter()
                .filter(|r| r.destination.eq_ignore_ascii_case(destination))
                .map(|r| {
                    json!({
                        "hotel": format!("{} Plaza", r.destination),
                        "destination": r.destination,
                        "nightly_minor": 850_000,
                        "currency": "KES",
                    })
                })
                .collect::<Vec<_>>(),
            // transfers and events have no curated dataset
            _ => Vec::new(),
        };

        if results.is_empty() {
            return None;
        }
        Some(Payload::new(results))
    }
}

struct CuratedRoute {
    origin: &'static str,
    destination: &'static str,
    bus_operator: &'static str,
    bus_fare_minor: i64,
    flight_carrier: Option<&'static str>,
    flight_fare_minor: i64,
}

/// The six major routes kept warm for upstream outages.
const CURATED: &[CuratedRoute] = &[
    CuratedRoute {
        origin: "Nairobi",
        destination: "Mombasa",
        bus_operator: "Coast Express",
        bus_fare_minor: 180_000,
        flight_carrier: Some("Jambo Air"),
        flight_fare_minor: 1_250_000,
    },
    CuratedRoute {
        origin: "Nairobi",
        destination: "Kisumu",
        bus_operator: "Lakeside Shuttle",
        bus_fare_minor: 150_000,
        flight_carrier: Some("Jambo Air"),
        flight_fare_minor: 980_000,
    },
    CuratedRoute {
        origin: "Nairobi",
        destination: "Nakuru",
        bus_operator: "Rift Line",
        bus_fare_minor: 80_000,
        flight_carrier: None,
        flight_fare_minor: 0,
    },
    CuratedRoute {
        origin: "Mombasa",
        destination: "Malindi",
        bus_operator: "Coast Express",
        bus_fare_minor: 60_000,
        flight_carrier: None,
        flight_fare_minor: 0,
    },
    CuratedRoute {
        origin: "Nairobi",
        destination: "Eldoret",
        bus_operator: "Highland Coach",
        bus_fare_minor: 120_000,
        flight_carrier: Some("Rift Wings"),
        flight_fare_minor: 870_000,
    },
    CuratedRoute {
        origin: "Nairobi",
        destination: "Arusha",
        bus_operator: "Border Link",
        bus_fare_minor: 250_000,
        flight_carrier: Some("Kili Connect"),
        flight_fare_minor: 1_600_000,
    },
];

fn curated_routes(origin: &str, destination: &str) -> Vec<&'static CuratedRoute> {
    CURATED
        .iter()
        .filter(|r| {
            r.origin.eq_ignore_ascii_case(origin)
                && r.destination.eq_ignore_ascii_case(destination)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CallCtx {
        CallCtx::new("alice".into())
    }

    #[tokio::test]
    async fn unconfigured_upstream_fails_execute() {
        let conn = TravelConnector::new(None);
        let action = IntentAction::SearchBuses {
            origin: "Nairobi".into(),
            destination: "Mombasa".into(),
            date: "2026-08-02".into(),
            pax: 1,
        };
        assert!(conn.execute(&action, &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn curated_fallback_covers_major_bus_routes() {
        let conn = TravelConnector::new(None);
        let action = IntentAction::SearchBuses {
            origin: "Nairobi".into(),
            destination: "Mombasa".into(),
            date: "2026-08-02".into(),
            pax: 1,
        };
        let payload = conn.fallback(&action, &ctx()).await.unwrap();
        assert!(!payload.results.is_empty());
        assert_eq!(payload.results[0]["operator"], "Coast Express");
        assert_eq!(payload.results[0]["date"], "2026-08-02");
    }

    #[tokio::test]
    async fn unknown_route_has_no_fallback() {
        let conn = TravelConnector::new(None);
        let action = IntentAction::SearchBuses {
            origin: "Lagos".into(),
            destination: "Accra".into(),
            date: "2026-08-02".into(),
            pax: 1,
        };
        assert!(conn.fallback(&action, &ctx()).await.is_none());
    }

    #[tokio::test]
    async fn flights_fallback_skips_bus_only_routes() {
        let conn = TravelConnector::new(None);
        let action = IntentAction::SearchFlights {
            origin: "Nairobi".into(),
            destination: "Nakuru".into(),
            date: "2026-08-02".into(),
            pax: 1,
        };
        assert!(conn.fallback(&action, &ctx()).await.is_none());
    }
}
