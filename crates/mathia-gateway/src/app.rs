use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use mathia_cache::{RateLimiter, TtlCache};
use mathia_connectors::McpRouter;
use mathia_core::config::MathiaConfig;
use mathia_core::types::{MessageFlags, MessageId, RoomId, UserId};
use mathia_core::{MathiaError, Result};
use mathia_crypto::{Keystore, RoomKey, WrappedKey};
use mathia_jobs::JobQueue;
use mathia_llm::LlmProvider;
use mathia_protocol::{MessageView, ServerFrame};
use mathia_store::{MessageRecord, NewMessage, Store};
use mathia_workers::WorkerContext;

use crate::hub::RoomHub;

/// Shown in place of a body the active keys cannot decrypt. History is
/// never silently shortened.
pub const UNREADABLE: &str = "[unreadable]";

/// Reserved sender id for assistant and system messages.
pub const ASSISTANT_USERNAME: &str = "mathia";

/// Central shared state — passed as Arc<AppState> to all Axum handlers and,
/// via `WorkerContext`, to every scheduled worker.
pub struct AppState {
    pub config: MathiaConfig,
    pub store: Arc<Store>,
    pub keystore: Keystore,
    pub cache: Arc<TtlCache>,
    pub limiter: Arc<RateLimiter>,
    pub hub: RoomHub,
    pub router: McpRouter,
    pub llm: Arc<dyn LlmProvider>,
    pub jobs: JobQueue,
    pub assistant_user: UserId,
    /// Lazily loaded active room keys: room id -> (version, key).
    /// Invalidated by `rotate_room_key`.
    room_keys: DashMap<RoomId, (i64, RoomKey)>,
    /// Serializes persist+broadcast per room so broadcast order always
    /// matches persisted order.
    room_locks: DashMap<RoomId, Arc<tokio::sync::Mutex<()>>>,
    /// In-flight assistant correlations: room -> (correlation id, token).
    active_intents: DashMap<RoomId, (MessageId, CancellationToken)>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MathiaConfig,
        store: Arc<Store>,
        keystore: Keystore,
        cache: Arc<TtlCache>,
        limiter: Arc<RateLimiter>,
        router: McpRouter,
        llm: Arc<dyn LlmProvider>,
        jobs: JobQueue,
        assistant_user: UserId,
    ) -> Self {
        Self {
            config,
            store,
            keystore,
            cache,
            limiter,
            hub: RoomHub::new(),
            router,
            llm,
            jobs,
            assistant_user,
            room_keys: DashMap::new(),
            room_locks: DashMap::new(),
            active_intents: DashMap::new(),
        }
    }

    /// Per-room critical section for the persist→broadcast pair.
    pub fn room_lock(&self, room: &RoomId) -> Arc<tokio::sync::Mutex<()>> {
        self.room_locks
            .entry(room.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// The active key of a room, issuing the first version on demand.
    pub fn active_key(&self, room: &RoomId) -> Result<(i64, RoomKey)> {
        if let Some(cached) = self.room_keys.get(room) {
            return Ok(cached.clone());
        }

        let loaded = match self.store.active_room_key(room)? {
            Some(rec) => {
                let wrapped = WrappedKey::from_blob(&rec.wrapped)
                    .map_err(|e| MathiaError::Keystore(e.to_string()))?;
                let key = self
                    .keystore
                    .unwrap_room_key(&wrapped)
                    .map_err(|e| MathiaError::Keystore(e.to_string()))?;
                (rec.version, key)
            }
            None => {
                let (key, wrapped) = self
                    .keystore
                    .issue_room_key()
                    .map_err(|e| MathiaError::Keystore(e.to_string()))?;
                let rec = self.store.insert_room_key(room, &wrapped.to_blob())?;
                (rec.version, key)
            }
        };

        self.room_keys.insert(room.clone(), loaded.clone());
        Ok(loaded)
    }

    /// Admin operation: write a new key version. Old versions continue to
    /// decrypt history.
    pub fn rotate_room_key(&self, room: &RoomId) -> Result<i64> {
        let (key, wrapped) = self
            .keystore
            .issue_room_key()
            .map_err(|e| MathiaError::Keystore(e.to_string()))?;
        let rec = self.store.rotate_room_key(room, &wrapped.to_blob())?;
        self.room_keys.insert(room.clone(), (rec.version, key));
        Ok(rec.version)
    }

    pub fn encrypt_body(&self, room: &RoomId, plaintext: &str) -> Result<(Vec<u8>, Vec<u8>, i64)> {
        let (version, key) = self.active_key(room)?;
        let (ciphertext, nonce) = mathia_crypto::encrypt(&key, plaintext.as_bytes())
            .map_err(|e| MathiaError::Keystore(e.to_string()))?;
        Ok((ciphertext, nonce.to_vec(), version))
    }

    /// Decrypt a stored message for egress. Failures yield the
    /// `[unreadable]` placeholder and a log record carrying only the room
    /// and sender ids.
    pub fn decrypt_body(&self, rec: &MessageRecord) -> String {
        let key = if let Some(cached) = self.room_keys.get(&rec.room_id) {
            if cached.0 == rec.key_version {
                Some(cached.1.clone())
            } else {
                None
            }
        } else {
            None
        };

        let key = match key {
            Some(k) => Some(k),
            None => self
                .store
                .room_key_version(&rec.room_id, rec.key_version)
                .ok()
                .flatten()
                .and_then(|kr| WrappedKey::from_blob(&kr.wrapped).ok())
                .and_then(|wrapped| self.keystore.unwrap_room_key(&wrapped).ok()),
        };

        let decrypted = key.and_then(|k| {
            mathia_crypto::decrypt(&k, &rec.ciphertext, &rec.nonce)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        });

        match decrypted {
            Some(text) => text,
            None => {
                warn!(
                    room_id = %rec.room_id,
                    sender_id = %rec.sender_id,
                    key_version = rec.key_version,
                    "message failed to decrypt"
                );
                UNREADABLE.to_string()
            }
        }
    }

    /// A record as clients see it.
    pub fn view_of(&self, rec: &MessageRecord) -> MessageView {
        MessageView {
            id: rec.id.clone(),
            chatid: rec.room_id.clone(),
            sender: rec.sender_id.clone(),
            body: self.decrypt_body(rec),
            ts: rec.ts.clone(),
            parent_id: rec.parent_id.clone(),
            flags: rec.flags,
        }
    }

    fn persist_from(
        &self,
        room: &RoomId,
        sender: &UserId,
        body: &str,
        flags: MessageFlags,
    ) -> Result<MessageView> {
        let (ciphertext, nonce, key_version) = self.encrypt_body(room, body)?;
        let rec = self.store.append_message(NewMessage {
            room_id: room,
            sender_id: sender,
            ciphertext,
            nonce,
            key_version,
            parent_id: None,
            flags,
        })?;
        Ok(MessageView {
            body: body.to_string(),
            ..self.view_of(&rec)
        })
    }
}

#[async_trait]
impl WorkerContext for AppState {
    fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn router(&self) -> &McpRouter {
        &self.router
    }

    fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    fn model(&self) -> String {
        self.config.llm.model.clone()
    }

    async fn broadcast(&self, room: &RoomId, frame: ServerFrame) {
        if let Err(e) = self.hub.broadcast(room, frame).await {
            warn!(room_id = %room, err = %e, "worker broadcast failed");
        }
    }

    fn persist_assistant_message(&self, room: &RoomId, body: &str) -> Result<MessageView> {
        self.persist_from(
            room,
            &self.assistant_user,
            body,
            MessageFlags {
                assistant: true,
                ..Default::default()
            },
        )
    }

    fn persist_system_message(&self, room: &RoomId, body: &str) -> Result<MessageView> {
        self.persist_from(room, &self.assistant_user, body, MessageFlags::default())
    }

    fn recent_plaintext(
        &self,
        room: &RoomId,
        limit: usize,
    ) -> Result<Vec<(MessageId, UserId, String)>> {
        let page = self.store.page_before(room, None, limit)?;
        Ok(page
            .iter()
            .map(|rec| (rec.id.clone(), rec.sender_id.clone(), self.decrypt_body(rec)))
            .collect())
    }

    fn begin_correlation(&self, room: &RoomId, correlation: &MessageId) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some((_, prior)) = self
            .active_intents
            .insert(room.clone(), (correlation.clone(), token.clone()))
        {
            prior.cancel();
        }
        token
    }

    fn end_correlation(&self, room: &RoomId, correlation: &MessageId) {
        self.active_intents
            .remove_if(room, |_, (active, _)| active == correlation);
    }

    fn whatsapp_number(&self, user: &UserId) -> Option<String> {
        let rec = self.store.get_credential(user, "whatsapp").ok().flatten()?;
        let mut nonce = [0u8; mathia_crypto::NONCE_LEN];
        if rec.nonce.len() != nonce.len() {
            return None;
        }
        nonce.copy_from_slice(&rec.nonce);
        let sealed = WrappedKey {
            ciphertext: rec.ciphertext,
            nonce,
        };
        let bytes = self.keystore.open(&sealed).ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl AppState {
    /// Cancel the in-flight assistant correlation for a room, if any.
    /// Called when a newer assistant request arrives.
    pub fn cancel_active_intent(&self, room: &RoomId) {
        if let Some(entry) = self.active_intents.get(room) {
            entry.1.cancel();
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/auth/register", post(crate::http::auth_api::register))
        .route("/auth/login", post(crate::http::auth_api::login))
        .route("/ws/chat/{room_id}", get(crate::ws::ws_handler))
        .route("/uploads/", post(crate::http::uploads::upload_handler))
        .route("/rooms/", get(crate::http::rooms::list_rooms))
        .route("/rooms/{id}/read/", post(crate::http::rooms::mark_read))
        .route("/rooms/{id}/pins/", get(crate::http::rooms::list_pins))
        .route(
            "/rooms/{id}/rotate-key/",
            post(crate::http::rooms::rotate_key),
        )
        .route(
            "/messages/{id}/pin/",
            post(crate::http::rooms::pin_message),
        )
        .route(
            "/messages/{id}/replies/",
            get(crate::http::rooms::list_replies),
        )
        .route("/quota/{connector}", get(crate::http::quota::quota_handler))
        .route(
            "/webhooks/{provider}/",
            post(crate::http::webhooks::webhook_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
