//! Utterance → intent. A cheap keyword pre-pass catches unambiguous forms;
//! everything else goes through one strict-JSON LLM call with a single
//! repair retry before falling back to a free-form chat intent.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mathia_cache::TtlCache;
use mathia_core::types::ReminderChannel;
use mathia_llm::{CompletionRequest, LlmProvider, Message, Mode, Role};

use crate::action::IntentAction;

const PARSE_CACHE_TTL: Duration = Duration::from_secs(900);

/// Caller-supplied context for one parse.
pub struct ParserInput<'a> {
    pub utterance: &'a str,
    /// Rendered room context (recent turns, room summary).
    pub room_context: &'a str,
    /// Rendered user profile snippet.
    pub user_profile: &'a str,
}

pub struct IntentParser {
    llm: Arc<dyn LlmProvider>,
    cache: Arc<TtlCache>,
    model: String,
}

impl IntentParser {
    pub fn new(llm: Arc<dyn LlmProvider>, cache: Arc<TtlCache>, model: String) -> Self {
        Self { llm, cache, model }
    }

    /// Parse an utterance into an action. Never fails: the worst case is
    /// the `Chat` fallback. Identical (utterance, profile, context)
    /// triples return the cached intent.
    pub async fn parse(
        &self,
        input: &ParserInput<'_>,
        cancel: &CancellationToken,
    ) -> IntentAction {
        if let Some(action) = quick_match(input.utterance, Utc::now()) {
            debug!(kind = %action.kind(), "quick-match intent");
            return action;
        }

        let cache_key = parse_cache_key(input);
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(action) = serde_json::from_value::<IntentAction>(cached) {
                debug!(kind = %action.kind(), "intent cache hit");
                return action;
            }
        }

        let mut action = self
            .llm_parse(input, cancel)
            .await
            .unwrap_or_else(|| IntentAction::Chat {
                text: input.utterance.to_string(),
            });
        action.normalize();

        if let Ok(value) = serde_json::to_value(&action) {
            self.cache.set(&cache_key, value, PARSE_CACHE_TTL);
        }
        action
    }

    /// Strict-JSON pass with one repair retry. Returns `None` when both
    /// attempts fail to produce a valid action.
    async fn llm_parse(
        &self,
        input: &ParserInput<'_>,
        cancel: &CancellationToken,
    ) -> Option<IntentAction> {
        let mut messages = vec![Message {
            role: Role::User,
            content: format!(
                "Room context:\n{}\n\nUser profile:\n{}\n\nUtterance:\n{}",
                input.room_context, input.user_profile, input.utterance
            ),
        }];

        for attempt in 0..2 {
            let req = CompletionRequest {
                model: self.model.clone(),
                system: SYSTEM_PROMPT.to_string(),
                messages: messages.clone(),
                max_tokens: 512,
                temperature: 0.0,
                mode: Mode::Json { schema: None },
            };

            let resp = match self.llm.complete(&req, cancel).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, err = %e, "intent LLM call failed");
                    return None;
                }
            };

            let error = match mathia_llm::parse_strict_json(&resp.content)
                .map_err(|e| format!("output is not valid JSON: {e}"))
                .and_then(|value| {
                    serde_json::from_value::<IntentAction>(value)
                        .map_err(|e| format!("JSON does not match any action schema: {e}"))
                })
                .and_then(|action| action.validate().map(|()| action))
            {
                Ok(action) => return Some(action),
                Err(e) => e,
            };

            warn!(attempt, error = %error, "intent parse attempt rejected");
            // feed the validator's complaint back for the single repair pass
            messages.push(Message {
                role: Role::Assistant,
                content: resp.content,
            });
            messages.push(Message {
                role: Role::User,
                content: format!("That was invalid: {error}. Reply with corrected JSON only."),
            });
            if attempt == 1 {
                break;
            }
        }
        None
    }
}

fn parse_cache_key(input: &ParserInput<'_>) -> String {
    let mut hasher = DefaultHasher::new();
    input.user_profile.hash(&mut hasher);
    let profile_hash = hasher.finish();
    let mut hasher = DefaultHasher::new();
    input.room_context.hash(&mut hasher);
    let context_hash = hasher.finish();
    let mut hasher = DefaultHasher::new();
    input.utterance.hash(&mut hasher);
    format!(
        "intent|{:016x}|{profile_hash:016x}|{context_hash:016x}",
        hasher.finish()
    )
}

/// Keyword pre-pass for unambiguous forms. Emits the intent directly,
/// skipping the LLM entirely.
pub fn quick_match(utterance: &str, now: DateTime<Utc>) -> Option<IntentAction> {
    let text = utterance.trim();
    let lower = text.to_lowercase();

    if lower == "balance" || lower == "show my balance" || lower == "my balance" {
        return Some(IntentAction::WalletBalance { currency: None });
    }
    if lower == "reminders" || lower == "list reminders" || lower == "my reminders" {
        return Some(IntentAction::ListReminders);
    }

    // `/remind <content> in <n> <unit> [via <channel>]`
    if let Some(rest) = text.strip_prefix("/remind ") {
        return parse_remind(rest, now);
    }
    if lower.starts_with("remind me ") {
        return parse_remind(&text["remind me ".len()..], now);
    }

    None
}

/// Parse `<content> in <n> <seconds|minutes|hours> [via <channel>]`.
fn parse_remind(rest: &str, now: DateTime<Utc>) -> Option<IntentAction> {
    let (rest, channel) = match rest.rsplit_once(" via ") {
        Some((head, tail)) => (head, tail.trim().parse::<ReminderChannel>().ok()?),
        None => (rest, ReminderChannel::Inapp),
    };

    let (content, when) = rest.rsplit_once(" in ")?;
    let mut parts = when.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    let delta = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => chrono::Duration::seconds(amount),
        "m" | "min" | "mins" | "minute" | "minutes" => chrono::Duration::minutes(amount),
        "h" | "hr" | "hrs" | "hour" | "hours" => chrono::Duration::hours(amount),
        "d" | "day" | "days" => chrono::Duration::days(amount),
        _ => return None,
    };

    let content = content.trim().trim_matches('"').to_string();
    if content.is_empty() {
        return None;
    }
    Some(IntentAction::SetReminder {
        content,
        due_at: (now + delta).to_rfc3339(),
        channel,
    })
}

const SYSTEM_PROMPT: &str = r#"You parse chat messages into assistant intents for Mathia.

Reply with one JSON object: {"action": "<name>", ...params}.

Actions and their params:
- search_buses / search_flights / search_transfers: origin, destination, date (YYYY-MM-DD), pax (integer >= 1)
- search_hotels: destination, check_in, check_out (YYYY-MM-DD), pax
- search_events: destination, date
- create_from_searches: title, search_refs (array of strings)
- summarize / recommend: itinerary_id
- export: itinerary_id, format ("json" | "ical" | "pdf")
- list_events: (no params)
- booking_link_of: target_user
- send_whatsapp: to (E.164 phone), body
- send_email: to, subject, body
- balance: currency (optional)
- list_txns: limit (optional, <= 20)
- set: content, due_at (ISO-8601 timestamp), channel ("inapp" | "email" | "whatsapp" | "both")
- list: (no params)
- cancel: id
- get_weather: city
- get_currency: from, to (3-letter codes), amount (optional)
- get_gif: query
- get_websearch: query
- chat: text — use when nothing else fits

Pick exactly one action. Do not invent actions or params."#;
