//! Itinerary adapter: compose travel-search picks into a draft, then
//! summarize, recommend over, or export it. Drafts are process-local
//! working state keyed by id; the owning user is recorded and enforced.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use uuid::Uuid;

use mathia_intent::{ActionKind, ExportFormat, IntentAction};

use crate::connector::{CallCtx, Connector, ConnectorError, Payload};

#[derive(Clone)]
struct Draft {
    owner: String,
    title: String,
    legs: Vec<String>,
    created_at: String,
}

#[derive(Default)]
pub struct ItineraryConnector {
    drafts: DashMap<String, Draft>,
}

impl ItineraryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn owned_draft(&self, id: &str, user: &str) -> Result<Draft, ConnectorError> {
        let draft = self
            .drafts
            .get(id)
            .ok_or_else(|| ConnectorError::Invalid(format!("unknown itinerary {id}")))?;
        if draft.owner != user {
            return Err(ConnectorError::Forbidden(
                "itineraries are private to their owner".to_string(),
            ));
        }
        Ok(draft.clone())
    }
}

#[async_trait]
impl Connector for ItineraryConnector {
    fn name(&self) -> &str {
        "itinerary"
    }

    fn supported_actions(&self) -> &[ActionKind] {
        &[
            ActionKind::CreateItinerary,
            ActionKind::SummarizeItinerary,
            ActionKind::RecommendItinerary,
            ActionKind::ExportItinerary,
        ]
    }

    // drafts mutate; reads must always see the latest state
    fn ttl_for(&self, _action: &IntentAction) -> Duration {
        Duration::ZERO
    }

    async fn execute(
        &self,
        action: &IntentAction,
        ctx: &CallCtx,
    ) -> Result<Payload, ConnectorError> {
        match action {
            IntentAction::CreateItinerary { title, search_refs } => {
                if search_refs.is_empty() {
                    return Err(ConnectorError::Invalid(
                        "an itinerary needs at least one search result".to_string(),
                    ));
                }
                let id = Uuid::now_v7().to_string();
                self.drafts.insert(
                    id.clone(),
                    Draft {
                        owner: ctx.user.to_string(),
                        title: title.clone(),
                        legs: search_refs.clone(),
                        created_at: chrono::Utc::now().to_rfc3339(),
                    },
                );
                Ok(Payload::new(vec![json!({
                    "itinerary_id": id,
                    "title": title,
                    "legs": search_refs.len(),
                })]))
            }
            IntentAction::SummarizeItinerary { itinerary_id } => {
                let draft = self.owned_draft(itinerary_id, ctx.user.as_str())?;
                let summary = format!(
                    "{}: {} legs, created {}",
                    draft.title,
                    draft.legs.len(),
                    draft.created_at
                );
                Ok(Payload::new(vec![json!({
                    "itinerary_id": itinerary_id,
                    "summary": summary,
                    "legs": draft.legs,
                })]))
            }
            IntentAction::RecommendItinerary { itinerary_id } => {
                let draft = self.owned_draft(itinerary_id, ctx.user.as_str())?;
                // heuristic suggestions derived from what the draft lacks
                let mut suggestions = Vec::new();
                if !draft.legs.iter().any(|l| l.contains("hotel")) {
                    suggestions.push(json!({"kind": "hotel", "note": "no stay booked yet"}));
                }
                if !draft.legs.iter().any(|l| l.contains("transfer")) {
                    suggestions
                        .push(json!({"kind": "transfer", "note": "consider an airport transfer"}));
                }
                Ok(Payload::new(suggestions))
            }
            IntentAction::ExportItinerary {
                itinerary_id,
                format,
            } => {
                let draft = self.owned_draft(itinerary_id, ctx.user.as_str())?;
                let document = match format {
                    ExportFormat::Json => json!({
                        "format": "json",
                        "body": {
                            "title": draft.title,
                            "legs": draft.legs,
                            "created_at": draft.created_at,
                        },
                    }),
                    ExportFormat::Ical => json!({
                        "format": "ical",
                        "body": render_ical(&draft),
                    }),
                    ExportFormat::Pdf => json!({
                        "format": "pdf",
                        // plain-text print layout; binary rendering is the client's job
                        "body": format!("{}\n{}\n", draft.title, draft.legs.join("\n")),
                    }),
                };
                Ok(Payload::new(vec![document]))
            }
            other => Err(ConnectorError::Invalid(format!(
                "itinerary cannot serve {}",
                other.kind()
            ))),
        }
    }
}

fn render_ical(draft: &Draft) -> String {
    let mut out = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//mathia//itinerary//EN\r\n");
    for (i, leg) in draft.legs.iter().enumerate() {
        out.push_str("BEGIN:VEVENT\r\n");
        out.push_str(&format!("UID:{}-{}\r\n", draft.created_at, i));
        out.push_str(&format!("SUMMARY:{leg}\r\n"));
        out.push_str("END:VEVENT\r\n");
    }
    out.push_str("END:VCALENDAR\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create(conn: &ItineraryConnector, user: &str) -> String {
        let action = IntentAction::CreateItinerary {
            title: "Coast trip".into(),
            search_refs: vec!["flight:NBO-MBA".into(), "hotel:mombasa-plaza".into()],
        };
        let payload = conn.execute(&action, &CallCtx::new(user.into())).await.unwrap();
        payload.results[0]["itinerary_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_then_summarize() {
        let conn = ItineraryConnector::new();
        let id = create(&conn, "alice").await;
        let payload = conn
            .execute(
                &IntentAction::SummarizeItinerary { itinerary_id: id },
                &CallCtx::new("alice".into()),
            )
            .await
            .unwrap();
        assert!(payload.results[0]["summary"]
            .as_str()
            .unwrap()
            .contains("Coast trip"));
    }

    #[tokio::test]
    async fn other_users_cannot_touch_a_draft() {
        let conn = ItineraryConnector::new();
        let id = create(&conn, "alice").await;
        let res = conn
            .execute(
                &IntentAction::SummarizeItinerary { itinerary_id: id },
                &CallCtx::new("eve".into()),
            )
            .await;
        assert!(matches!(res, Err(ConnectorError::Forbidden(_))));
    }

    #[tokio::test]
    async fn ical_export_renders_events() {
        let conn = ItineraryConnector::new();
        let id = create(&conn, "alice").await;
        let payload = conn
            .execute(
                &IntentAction::ExportItinerary {
                    itinerary_id: id,
                    format: ExportFormat::Ical,
                },
                &CallCtx::new("alice".into()),
            )
            .await
            .unwrap();
        let body = payload.results[0]["body"].as_str().unwrap();
        assert!(body.starts_with("BEGIN:VCALENDAR"));
        assert_eq!(body.matches("BEGIN:VEVENT").count(), 2);
    }

    #[tokio::test]
    async fn empty_itinerary_is_invalid() {
        let conn = ItineraryConnector::new();
        let res = conn
            .execute(
                &IntentAction::CreateItinerary {
                    title: "empty".into(),
                    search_refs: Vec::new(),
                },
                &CallCtx::new("alice".into()),
            )
            .await;
        assert!(matches!(res, Err(ConnectorError::Invalid(_))));
    }
}
