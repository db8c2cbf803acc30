use serde::{Deserialize, Serialize};

use mathia_core::types::{MessageId, ReminderChannel, RoomId, UserId};

/// Everything the assistant can be asked to do, as a closed enum with a
/// data-bearing variant per action. The router matches exhaustively, so an
/// unsupported action is a schema-time error, never a stringly-typed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IntentAction {
    SearchBuses {
        origin: String,
        destination: String,
        date: String,
        pax: u32,
    },
    SearchHotels {
        destination: String,
        check_in: String,
        check_out: String,
        pax: u32,
    },
    SearchFlights {
        origin: String,
        destination: String,
        date: String,
        pax: u32,
    },
    SearchTransfers {
        origin: String,
        destination: String,
        date: String,
        pax: u32,
    },
    SearchEvents {
        destination: String,
        date: String,
    },
    CreateItinerary {
        title: String,
        search_refs: Vec<String>,
    },
    SummarizeItinerary {
        itinerary_id: String,
    },
    RecommendItinerary {
        itinerary_id: String,
    },
    ExportItinerary {
        itinerary_id: String,
        format: ExportFormat,
    },
    ListCalendarEvents,
    BookingLinkOf {
        target_user: String,
    },
    SendWhatsapp {
        to: String,
        body: String,
    },
    SendEmail {
        to: String,
        subject: String,
        body: String,
    },
    WalletBalance {
        #[serde(default)]
        currency: Option<String>,
    },
    ListWalletTxns {
        #[serde(default)]
        limit: Option<u32>,
    },
    SetReminder {
        content: String,
        due_at: String,
        channel: ReminderChannel,
    },
    ListReminders,
    CancelReminder {
        id: String,
    },
    GetWeather {
        city: String,
    },
    GetCurrency {
        from: String,
        to: String,
        #[serde(default)]
        amount: Option<f64>,
    },
    GetGif {
        query: String,
    },
    WebSearch {
        query: String,
    },
    ClassifyText {
        text: String,
    },
    /// Free-form reply — the parser's fallback when no structured action
    /// survives validation.
    Chat {
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Ical,
    Pdf,
}

/// Fieldless mirror of `IntentAction`, used as the router registry key and
/// in log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SearchBuses,
    SearchHotels,
    SearchFlights,
    SearchTransfers,
    SearchEvents,
    CreateItinerary,
    SummarizeItinerary,
    RecommendItinerary,
    ExportItinerary,
    ListCalendarEvents,
    BookingLinkOf,
    SendWhatsapp,
    SendEmail,
    WalletBalance,
    ListWalletTxns,
    SetReminder,
    ListReminders,
    CancelReminder,
    GetWeather,
    GetCurrency,
    GetGif,
    WebSearch,
    ClassifyText,
    Chat,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SearchBuses => "search_buses",
            ActionKind::SearchHotels => "search_hotels",
            ActionKind::SearchFlights => "search_flights",
            ActionKind::SearchTransfers => "search_transfers",
            ActionKind::SearchEvents => "search_events",
            ActionKind::CreateItinerary => "create_from_searches",
            ActionKind::SummarizeItinerary => "summarize",
            ActionKind::RecommendItinerary => "recommend",
            ActionKind::ExportItinerary => "export",
            ActionKind::ListCalendarEvents => "list_events",
            ActionKind::BookingLinkOf => "booking_link_of",
            ActionKind::SendWhatsapp => "send_whatsapp",
            ActionKind::SendEmail => "send_email",
            ActionKind::WalletBalance => "balance",
            ActionKind::ListWalletTxns => "list_txns",
            ActionKind::SetReminder => "set",
            ActionKind::ListReminders => "list",
            ActionKind::CancelReminder => "cancel",
            ActionKind::GetWeather => "get_weather",
            ActionKind::GetCurrency => "get_currency",
            ActionKind::GetGif => "get_gif",
            ActionKind::WebSearch => "get_websearch",
            ActionKind::ClassifyText => "classify",
            ActionKind::Chat => "chat",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IntentAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            IntentAction::SearchBuses { .. } => ActionKind::SearchBuses,
            IntentAction::SearchHotels { .. } => ActionKind::SearchHotels,
            IntentAction::SearchFlights { .. } => ActionKind::SearchFlights,
            IntentAction::SearchTransfers { .. } => ActionKind::SearchTransfers,
            IntentAction::SearchEvents { .. } => ActionKind::SearchEvents,
            IntentAction::CreateItinerary { .. } => ActionKind::CreateItinerary,
            IntentAction::SummarizeItinerary { .. } => ActionKind::SummarizeItinerary,
            IntentAction::RecommendItinerary { .. } => ActionKind::RecommendItinerary,
            IntentAction::ExportItinerary { .. } => ActionKind::ExportItinerary,
            IntentAction::ListCalendarEvents => ActionKind::ListCalendarEvents,
            IntentAction::BookingLinkOf { .. } => ActionKind::BookingLinkOf,
            IntentAction::SendWhatsapp { .. } => ActionKind::SendWhatsapp,
            IntentAction::SendEmail { .. } => ActionKind::SendEmail,
            IntentAction::WalletBalance { .. } => ActionKind::WalletBalance,
            IntentAction::ListWalletTxns { .. } => ActionKind::ListWalletTxns,
            IntentAction::SetReminder { .. } => ActionKind::SetReminder,
            IntentAction::ListReminders => ActionKind::ListReminders,
            IntentAction::CancelReminder { .. } => ActionKind::CancelReminder,
            IntentAction::GetWeather { .. } => ActionKind::GetWeather,
            IntentAction::GetCurrency { .. } => ActionKind::GetCurrency,
            IntentAction::GetGif { .. } => ActionKind::GetGif,
            IntentAction::WebSearch { .. } => ActionKind::WebSearch,
            IntentAction::ClassifyText { .. } => ActionKind::ClassifyText,
            IntentAction::Chat { .. } => ActionKind::Chat,
        }
    }

    /// Schema-time parameter checks, applied both after parsing and again
    /// by the dispatch pipeline.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            IntentAction::SearchBuses { date, pax, .. }
            | IntentAction::SearchFlights { date, pax, .. }
            | IntentAction::SearchTransfers { date, pax, .. } => {
                validate_date(date)?;
                validate_pax(*pax)
            }
            IntentAction::SearchHotels {
                check_in,
                check_out,
                pax,
                ..
            } => {
                validate_date(check_in)?;
                validate_date(check_out)?;
                validate_pax(*pax)
            }
            IntentAction::SearchEvents { date, .. } => validate_date(date),
            IntentAction::SetReminder { due_at, content, .. } => {
                if content.trim().is_empty() {
                    return Err("content: must not be empty".to_string());
                }
                chrono::DateTime::parse_from_rfc3339(due_at)
                    .map(|_| ())
                    .map_err(|_| "due_at: must be an ISO-8601 timestamp".to_string())
            }
            IntentAction::SendWhatsapp { to, body } => {
                validate_phone(to)?;
                validate_body(body)
            }
            IntentAction::SendEmail { to, body, .. } => {
                validate_email(to)?;
                validate_body(body)
            }
            IntentAction::ListWalletTxns { limit } => {
                if limit.is_some_and(|l| l > 20) {
                    return Err("limit: at most 20".to_string());
                }
                Ok(())
            }
            IntentAction::GetCurrency { from, to, .. } => {
                if from.len() != 3 || to.len() != 3 {
                    return Err("currency codes are three letters".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Canonicalize user-entered fields: origin/destination in title case,
    /// currency codes upper-cased. Keeps cache keys stable across
    /// capitalization variants.
    pub fn normalize(&mut self) {
        match self {
            IntentAction::SearchBuses {
                origin,
                destination,
                ..
            }
            | IntentAction::SearchFlights {
                origin,
                destination,
                ..
            }
            | IntentAction::SearchTransfers {
                origin,
                destination,
                ..
            } => {
                *origin = title_case(origin);
                *destination = title_case(destination);
            }
            IntentAction::SearchHotels { destination, .. }
            | IntentAction::SearchEvents { destination, .. } => {
                *destination = title_case(destination);
            }
            IntentAction::GetCurrency { from, to, .. } => {
                *from = from.to_uppercase();
                *to = to.to_uppercase();
            }
            _ => {}
        }
    }

    /// The action's parameters as a JSON object (tag stripped), for cache
    /// keys and log records.
    pub fn params(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("action");
        }
        value
    }
}

fn validate_pax(pax: u32) -> Result<(), String> {
    if pax < 1 {
        return Err("pax: must be >= 1".to_string());
    }
    Ok(())
}

fn validate_date(date: &str) -> Result<(), String> {
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| format!("date '{date}': must be ISO-8601 (YYYY-MM-DD)"))
}

fn validate_email(addr: &str) -> Result<(), String> {
    let Some((local, domain)) = addr.split_once('@') else {
        return Err("to: not a valid email address".to_string());
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || addr.contains(' ') {
        return Err("to: not a valid email address".to_string());
    }
    Ok(())
}

fn validate_phone(number: &str) -> Result<(), String> {
    let digits = number.strip_prefix('+').unwrap_or(number);
    if digits.len() < 7 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err("to: not a valid phone number".to_string());
    }
    Ok(())
}

fn validate_body(body: &str) -> Result<(), String> {
    if body.trim().is_empty() {
        return Err("body: must not be empty".to_string());
    }
    if body.len() > 4096 {
        return Err("body: at most 4096 bytes".to_string());
    }
    Ok(())
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A fully resolved intent, ready for the router. `user` and `room` come
/// from the authenticated session, never from model output.
#[derive(Debug, Clone)]
pub struct Intent {
    pub action: IntentAction,
    pub user: UserId,
    pub room: RoomId,
    pub correlation_id: MessageId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_wire_format() {
        let action = IntentAction::SearchFlights {
            origin: "Nairobi".into(),
            destination: "London".into(),
            date: "2025-12-25".into(),
            pax: 2,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "search_flights");
        assert_eq!(json["pax"], 2);

        let parsed: IntentAction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let json = serde_json::json!({"action": "transfer_funds", "amount": 100});
        assert!(serde_json::from_value::<IntentAction>(json).is_err());
    }

    #[test]
    fn pax_and_date_validation() {
        let bad_pax = IntentAction::SearchBuses {
            origin: "Nairobi".into(),
            destination: "Mombasa".into(),
            date: "2025-12-25".into(),
            pax: 0,
        };
        assert!(bad_pax.validate().is_err());

        let bad_date = IntentAction::SearchBuses {
            origin: "Nairobi".into(),
            destination: "Mombasa".into(),
            date: "next tuesday".into(),
            pax: 1,
        };
        assert!(bad_date.validate().is_err());
    }

    #[test]
    fn normalization_title_cases_places() {
        let mut action = IntentAction::SearchFlights {
            origin: "NAIROBI".into(),
            destination: "london".into(),
            date: "2025-12-25".into(),
            pax: 1,
        };
        action.normalize();
        match action {
            IntentAction::SearchFlights {
                origin,
                destination,
                ..
            } => {
                assert_eq!(origin, "Nairobi");
                assert_eq!(destination, "London");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn email_and_phone_validation() {
        assert!(IntentAction::SendEmail {
            to: "ann@example.com".into(),
            subject: "hi".into(),
            body: "hello".into(),
        }
        .validate()
        .is_ok());
        assert!(IntentAction::SendEmail {
            to: "not-an-email".into(),
            subject: "hi".into(),
            body: "hello".into(),
        }
        .validate()
        .is_err());
        assert!(IntentAction::SendWhatsapp {
            to: "+254700000001".into(),
            body: "hello".into(),
        }
        .validate()
        .is_ok());
        assert!(IntentAction::SendWhatsapp {
            to: "call me".into(),
            body: "hello".into(),
        }
        .validate()
        .is_err());
    }

    #[test]
    fn txn_limit_capped_at_twenty() {
        assert!(IntentAction::ListWalletTxns { limit: Some(20) }.validate().is_ok());
        assert!(IntentAction::ListWalletTxns { limit: Some(21) }.validate().is_err());
    }

    #[test]
    fn params_strips_the_tag() {
        let action = IntentAction::GetWeather {
            city: "Nairobi".into(),
        };
        let params = action.params();
        assert!(params.get("action").is_none());
        assert_eq!(params["city"], "Nairobi");
    }
}
