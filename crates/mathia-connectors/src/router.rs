//! The MCP router: action → connector registry plus the per-call log
//! record. All assistant side effects flow through `route`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use mathia_core::types::UserId;
use mathia_intent::{ActionKind, IntentAction};

use crate::connector::{CallCtx, Connector};
use crate::dispatch::Dispatcher;
use crate::result::{ConnectorResult, ResultStatus};

/// Callback invoked once per admitted upstream call, for the durable
/// usage mirror behind quota inspection.
pub type UsageRecorder = Box<dyn Fn(&UserId, &str) + Send + Sync>;

pub struct McpRouter {
    registry: HashMap<ActionKind, Arc<dyn Connector>>,
    dispatcher: Dispatcher,
    usage: Option<UsageRecorder>,
}

impl McpRouter {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            registry: HashMap::new(),
            dispatcher,
            usage: None,
        }
    }

    pub fn set_usage_recorder(&mut self, recorder: UsageRecorder) {
        self.usage = Some(recorder);
    }

    /// Register a connector for every action it declares. A second binding
    /// for the same action is a wiring bug and fails loudly at startup.
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<(), String> {
        for kind in connector.supported_actions() {
            if let Some(existing) = self.registry.get(kind) {
                return Err(format!(
                    "action {kind} already bound to connector '{}'",
                    existing.name()
                ));
            }
            self.registry.insert(*kind, connector.clone());
        }
        Ok(())
    }

    pub fn connector_for(&self, kind: ActionKind) -> Option<&Arc<dyn Connector>> {
        self.registry.get(&kind)
    }

    /// Dispatch an action. Unregistered actions surface as `unsupported`;
    /// everything else is the connector pipeline's uniform envelope.
    pub async fn route(&self, action: &IntentAction, ctx: &CallCtx) -> ConnectorResult {
        let kind = action.kind();
        let started = Instant::now();

        let result = match self.registry.get(&kind) {
            Some(connector) => {
                self.dispatcher
                    .dispatch(connector.as_ref(), action, ctx)
                    .await
            }
            None => ConnectorResult::unsupported("router", format!("action {kind} not registered")),
        };

        // cached hits and denied calls never reached the upstream
        if let Some(ref record) = self.usage {
            let admitted = !result.cached
                && !matches!(
                    result.status,
                    ResultStatus::RateLimited { .. } | ResultStatus::Unsupported { .. }
                );
            if admitted {
                record(&ctx.user, &result.metadata.provider);
            }
        }

        info!(
            action = %kind,
            connector = %result.metadata.provider,
            user = %ctx.user,
            latency_ms = started.elapsed().as_millis() as u64,
            cache_hit = result.cached,
            status = result.status_label(),
            "connector call"
        );
        result
    }
}
