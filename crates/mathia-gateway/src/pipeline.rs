//! The message pipeline: authorize → rate-limit → idempotency → encrypt →
//! persist → broadcast, with the assistant fork at the end.
//!
//! Persist and broadcast happen under the room lock, so within a room the
//! broadcast order is exactly the persisted order. Plaintext exists only
//! on the way in (before encrypt) and on the way out (egress decrypt);
//! the store sees ciphertext alone.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use mathia_core::config::IDEMPOTENCY_TTL_SECS;
use mathia_core::types::{MessageFlags, MessageId, RoomId, UserId};
use mathia_core::{MathiaError, Result};
use mathia_intent::{is_assistant_trigger, strip_trigger};
use mathia_jobs::EnqueueOpts;
use mathia_protocol::{FileKind, MessageView, ServerFrame};
use mathia_store::NewMessage;
use mathia_workers::ASSISTANT_JOB;

use crate::app::AppState;

const DEFAULT_HISTORY_PAGE: usize = 50;
const MAX_HISTORY_PAGE: usize = 200;

/// Handle an inbound `new_message` frame. Returns the persisted view, or
/// `None` when the message was deliberately dropped (duplicate idempotency
/// key). Rate-limit violations surface as `RateLimited`.
pub async fn handle_new_message(
    state: &Arc<AppState>,
    room: &RoomId,
    sender: &UserId,
    body: &str,
    idempotency_key: Option<&str>,
    parent_id: Option<&MessageId>,
    flags: MessageFlags,
) -> Result<Option<MessageView>> {
    // authorize: membership may have been revoked after join
    if !state.store.is_member(room, sender)? {
        return Err(MathiaError::Forbidden {
            reason: "not a room member".to_string(),
        });
    }

    // per-(user, room) send throttle
    let decision = state.limiter.take(
        &format!("send|{sender}|{room}"),
        state.config.limits.messages_per_window,
        Duration::from_secs(state.config.limits.message_window_secs),
    );
    if !decision.allowed {
        return Err(MathiaError::RateLimited {
            retry_after_secs: decision.retry_after.as_secs().max(1),
        });
    }

    // client re-sends with the same key are suppressed for 10 minutes
    if let Some(key) = idempotency_key {
        let gate = format!("idem|{sender}|{room}|{key}");
        if !state.cache.set_if_absent(
            &gate,
            json!(true),
            Duration::from_secs(IDEMPOTENCY_TTL_SECS),
        ) {
            info!(user_id = %sender, room_id = %room, "duplicate send suppressed");
            return Ok(None);
        }
    }

    let (ciphertext, nonce, key_version) = state.encrypt_body(room, body)?;

    // persist and broadcast under the room lock — broadcast order is
    // persisted order
    let lock = state.room_lock(room);
    let guard = lock.lock().await;
    let rec = state.store.append_message(NewMessage {
        room_id: room,
        sender_id: sender,
        ciphertext,
        nonce,
        key_version,
        parent_id,
        flags,
    })?;
    let view = MessageView {
        body: body.to_string(),
        ..state.view_of(&rec)
    };
    state
        .hub
        .broadcast(room, ServerFrame::NewMessage {
            message: view.clone(),
        })
        .await
        .map_err(|e| MathiaError::Internal(e.to_string()))?;
    drop(guard);

    // assistant fork: correlation id = message id
    if is_assistant_trigger(body) {
        fork_assistant(state, room, sender, &rec.id, body);
    }

    Ok(Some(view))
}

/// A message whose body references a stored file.
pub async fn handle_file_message(
    state: &Arc<AppState>,
    room: &RoomId,
    sender: &UserId,
    file_ref: &str,
    kind: FileKind,
) -> Result<Option<MessageView>> {
    let flags = match kind {
        FileKind::Image => MessageFlags {
            image: true,
            ..Default::default()
        },
        FileKind::File => MessageFlags {
            file: true,
            ..Default::default()
        },
        FileKind::Voice => MessageFlags {
            voice: true,
            ..Default::default()
        },
    };
    handle_new_message(state, room, sender, file_ref, None, None, flags).await
}

/// History fetch: the most recent page, decrypted, oldest first.
pub async fn fetch_messages(
    state: &Arc<AppState>,
    room: &RoomId,
    requester: &UserId,
    before: Option<&MessageId>,
    limit: Option<usize>,
) -> Result<ServerFrame> {
    if !state.store.is_member(room, requester)? {
        return Err(MathiaError::Forbidden {
            reason: "not a room member".to_string(),
        });
    }

    let limit = limit.unwrap_or(DEFAULT_HISTORY_PAGE).min(MAX_HISTORY_PAGE);
    let page = state.store.page_before(room, before, limit)?;
    let messages = page.iter().map(|rec| state.view_of(rec)).collect();
    Ok(ServerFrame::Messages { messages })
}

/// Submit the assistant intent job, cancelling any in-flight correlation
/// for the room first.
fn fork_assistant(
    state: &Arc<AppState>,
    room: &RoomId,
    user: &UserId,
    correlation: &MessageId,
    body: &str,
) {
    state.cancel_active_intent(room);

    let utterance = strip_trigger(body);
    let payload = json!({
        "correlation_id": correlation,
        "room": room,
        "user": user,
        "utterance": utterance,
    });
    match state.jobs.enqueue(
        ASSISTANT_JOB,
        payload,
        EnqueueOpts {
            priority: 10,
            dedup_key: Some(format!("assistant|{correlation}")),
            ..Default::default()
        },
    ) {
        Ok(Some(job)) => {
            info!(correlation_id = %correlation, job_id = %job.id, "assistant intent queued")
        }
        Ok(None) => {}
        Err(e) => warn!(correlation_id = %correlation, err = %e, "assistant enqueue failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathia_cache::{RateLimiter, TtlCache};
    use mathia_connectors::{Dispatcher, McpRouter};
    use mathia_core::config::{LimitsConfig, MathiaConfig};
    use mathia_core::types::RoomKind;
    use mathia_crypto::{Keystore, RoomKey};
    use mathia_jobs::JobQueue;
    use mathia_llm::LlmProvider;
    use mathia_store::Store;
    use rusqlite::Connection;
    use tokio::sync::mpsc;

    fn test_state(limits: LimitsConfig) -> Arc<AppState> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cache = Arc::new(TtlCache::new());
        let limiter = Arc::new(RateLimiter::new());
        let dispatcher = Dispatcher::new(cache.clone(), limiter.clone(), limits.clone());
        let jobs = JobQueue::new(Connection::open_in_memory().unwrap()).unwrap();
        let llm: Arc<dyn LlmProvider> = Arc::new(crate::UnconfiguredProvider);
        let assistant = store
            .create_user("mathia", "assistant@mathia.local", "pw")
            .unwrap()
            .id;
        let config = MathiaConfig {
            limits,
            ..Default::default()
        };
        Arc::new(AppState::new(
            config,
            store,
            Keystore::new(RoomKey::generate(), Vec::new()),
            cache,
            limiter,
            McpRouter::new(dispatcher),
            llm,
            jobs,
            assistant,
        ))
    }

    fn seeded(limits: LimitsConfig) -> (Arc<AppState>, UserId, RoomId) {
        let state = test_state(limits);
        let alice = state
            .store
            .create_user("alice", "a@example.com", "pw")
            .unwrap()
            .id;
        let room = state
            .store
            .create_room(RoomKind::Group, "general", &alice)
            .unwrap()
            .id;
        (state, alice, room)
    }

    #[tokio::test]
    async fn send_persists_broadcasts_in_order() {
        let (state, alice, room) = seeded(LimitsConfig::default());
        let (tx, mut rx) = mpsc::channel(64);
        state.hub.join(&room, &alice, "s1", tx);

        handle_new_message(&state, &room, &alice, "hello", None, None, Default::default())
            .await
            .unwrap();
        handle_new_message(&state, &room, &alice, "world", None, None, Default::default())
            .await
            .unwrap();

        let mut bodies = Vec::new();
        while bodies.len() < 2 {
            let json = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if json.contains(r#""command":"new_message""#) {
                let v: serde_json::Value = serde_json::from_str(&json).unwrap();
                bodies.push(v["message"]["body"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(bodies, vec!["hello", "world"]);

        // history returns the same order, with t1 <= t2
        let frame = fetch_messages(&state, &room, &alice, None, None).await.unwrap();
        match frame {
            ServerFrame::Messages { messages } => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[0].body, "hello");
                assert_eq!(messages[1].body, "world");
                assert!(messages[0].ts <= messages[1].ts);
            }
            other => panic!("expected messages frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stored_bodies_are_ciphertext_only() {
        let (state, alice, room) = seeded(LimitsConfig::default());
        handle_new_message(&state, &room, &alice, "top secret", None, None, Default::default())
            .await
            .unwrap();

        let page = state.store.page_before(&room, None, 10).unwrap();
        let rec = &page[0];
        assert_ne!(rec.ciphertext, b"top secret".to_vec());
        assert!(!String::from_utf8_lossy(&rec.ciphertext).contains("top secret"));
        // egress decryption recovers it
        assert_eq!(state.decrypt_body(rec), "top secret");
    }

    #[tokio::test]
    async fn non_members_are_forbidden() {
        let (state, _, room) = seeded(LimitsConfig::default());
        let eve = state
            .store
            .create_user("eve", "e@example.com", "pw")
            .unwrap()
            .id;
        let err = handle_new_message(&state, &room, &eve, "hi", None, None, Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MathiaError::Forbidden { .. }));
        assert_eq!(err.ws_close_code(), Some(4003));
        // no message was persisted
        assert!(state.store.page_before(&room, None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_rate_limit_boundary() {
        let limits = LimitsConfig {
            messages_per_window: 3,
            ..Default::default()
        };
        let (state, alice, room) = seeded(limits);

        for i in 0..3 {
            handle_new_message(&state, &room, &alice, &format!("m{i}"), None, None, Default::default())
                .await
                .unwrap();
        }
        let err = handle_new_message(&state, &room, &alice, "m3", None, None, Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MathiaError::RateLimited { .. }));
        assert_eq!(state.store.page_before(&room, None, 10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn idempotency_key_suppresses_duplicates() {
        let (state, alice, room) = seeded(LimitsConfig::default());

        let first = handle_new_message(
            &state, &room, &alice, "once", Some("key-1"), None, Default::default(),
        )
        .await
        .unwrap();
        assert!(first.is_some());

        let second = handle_new_message(
            &state, &room, &alice, "once", Some("key-1"), None, Default::default(),
        )
        .await
        .unwrap();
        assert!(second.is_none());

        assert_eq!(state.store.page_before(&room, None, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trigger_forks_assistant_job_with_message_id_correlation() {
        let (state, alice, room) = seeded(LimitsConfig::default());

        let view = handle_new_message(
            &state, &room, &alice, "@mathia show my balance", None, None, Default::default(),
        )
        .await
        .unwrap()
        .unwrap();

        let pending = state.jobs.pending_jobs(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, ASSISTANT_JOB);
        assert_eq!(
            pending[0].payload["correlation_id"].as_str().unwrap(),
            view.id.as_str()
        );
        assert_eq!(
            pending[0].payload["utterance"].as_str().unwrap(),
            "show my balance"
        );
    }

    #[tokio::test]
    async fn plain_messages_do_not_fork() {
        let (state, alice, room) = seeded(LimitsConfig::default());
        handle_new_message(&state, &room, &alice, "hello world", None, None, Default::default())
            .await
            .unwrap();
        assert!(state.jobs.pending_jobs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_room_history_is_served_to_future_joiners() {
        let (state, alice, room) = seeded(LimitsConfig::default());
        // no transports connected — persistence still happens
        handle_new_message(&state, &room, &alice, "for later", None, None, Default::default())
            .await
            .unwrap();

        let frame = fetch_messages(&state, &room, &alice, None, None).await.unwrap();
        match frame {
            ServerFrame::Messages { messages } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].body, "for later");
            }
            other => panic!("expected messages frame, got {other:?}"),
        }
    }
}
