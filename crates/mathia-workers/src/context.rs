//! The seam between scheduled workers and the host process.
//!
//! Workers are generic over `WorkerContext` so the same job logic runs
//! against the gateway's `AppState` in production and against a hermetic
//! stub in tests. Everything that touches the hub, the keystore, or other
//! gateway-owned state crosses this trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mathia_connectors::McpRouter;
use mathia_core::types::{MessageId, RoomId, UserId};
use mathia_core::Result;
use mathia_llm::LlmProvider;
use mathia_protocol::{MessageView, ServerFrame};
use mathia_store::Store;

#[async_trait]
pub trait WorkerContext: Send + Sync + 'static {
    fn store(&self) -> &Arc<Store>;
    fn router(&self) -> &McpRouter;
    fn llm(&self) -> &Arc<dyn LlmProvider>;
    fn model(&self) -> String;

    /// Fan a frame out to the room's connected transports, in order.
    async fn broadcast(&self, room: &RoomId, frame: ServerFrame);

    /// Encrypt and persist an assistant message; returns the transport view.
    fn persist_assistant_message(&self, room: &RoomId, body: &str) -> Result<MessageView>;

    /// Encrypt and persist a system notice (reminder fire, cancellation
    /// note, moderation alert) and return the transport view.
    fn persist_system_message(&self, room: &RoomId, body: &str) -> Result<MessageView>;

    /// Recent messages of a room, decrypted, oldest first. Undecryptable
    /// bodies surface as the `[unreadable]` placeholder.
    fn recent_plaintext(
        &self,
        room: &RoomId,
        limit: usize,
    ) -> Result<Vec<(MessageId, UserId, String)>>;

    /// Start an assistant correlation for a room, cancelling any prior
    /// in-flight correlation there. Returns the new token.
    fn begin_correlation(&self, room: &RoomId, correlation: &MessageId) -> CancellationToken;

    /// Drop the correlation registration if it is still the active one.
    fn end_correlation(&self, room: &RoomId, correlation: &MessageId);

    /// The user's linked whatsapp number, when the integration exists.
    fn whatsapp_number(&self, user: &UserId) -> Option<String>;
}
