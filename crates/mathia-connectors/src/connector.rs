use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use mathia_cache::Scope;
use mathia_core::types::{MessageId, RoomId, UserId};
use mathia_intent::{ActionKind, IntentAction};

/// Per-call context. `user` comes from the authenticated session; the
/// cancellation token propagates client disconnects and superseded
/// assistant requests into in-flight upstream calls.
#[derive(Debug, Clone)]
pub struct CallCtx {
    pub user: UserId,
    pub room: Option<RoomId>,
    pub correlation_id: Option<MessageId>,
    pub cancel: CancellationToken,
}

impl CallCtx {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            room: None,
            correlation_id: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// What a successful execute (or fallback) hands back to the framework
/// before envelope normalization.
#[derive(Debug, Clone)]
pub struct Payload {
    pub results: Vec<Value>,
    pub cost_hint: Option<String>,
    /// True when the outcome is degraded (queued-for-retry, truncated
    /// result set). Partial payloads are never cached.
    pub partial: bool,
}

impl Payload {
    pub fn new(results: Vec<Value>) -> Self {
        Self {
            results,
            cost_hint: None,
            partial: false,
        }
    }

    pub fn with_cost(mut self, hint: impl Into<String>) -> Self {
        self.cost_hint = Some(hint.into());
        self
    }

    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not authorized: {0}")]
    Forbidden(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("quota exhausted, retry after {retry_after_secs}s")]
    QuotaExceeded { retry_after_secs: u64 },

    #[error("upstream deadline exceeded")]
    Timeout,
}

/// One external-service adapter. The dispatch pipeline wraps every call in
/// validate → cache-check → rate-check → execute-with-deadline → normalize
/// → cache-store; implementations only provide the middle.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique name, used in rate-limit keys, log records, and metadata.
    fn name(&self) -> &str;

    /// Actions this connector serves. Checked at registration.
    fn supported_actions(&self) -> &[ActionKind];

    /// Cache scope for an action. User-scoped results are salted with the
    /// requesting user's id (see mathia-cache).
    fn scope(&self, action: ActionKind) -> Scope {
        let _ = action;
        Scope::User
    }

    /// Result-cache TTL. `Duration::ZERO` disables caching for the action.
    fn ttl_for(&self, action: &IntentAction) -> Duration {
        let _ = action;
        Duration::from_secs(3600)
    }

    /// Upstream deadline for one execute call.
    fn deadline(&self) -> Duration {
        Duration::from_secs(15)
    }

    /// Perform the action against the upstream.
    async fn execute(&self, action: &IntentAction, ctx: &CallCtx)
        -> Result<Payload, ConnectorError>;

    /// Degraded-path result when execute fails. Default: none — the
    /// failure is surfaced.
    async fn fallback(&self, action: &IntentAction, ctx: &CallCtx) -> Option<Payload> {
        let _ = (action, ctx);
        None
    }
}
