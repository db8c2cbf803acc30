//! The connector call pipeline: validate → cache-check → rate-check →
//! execute-with-deadline → normalize → cache-store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::warn;

use mathia_cache::{cache_key, RateLimiter, TtlCache};
use mathia_core::config::LimitsConfig;
use mathia_intent::IntentAction;

use crate::connector::{CallCtx, Connector, ConnectorError};
use crate::result::{ConnectorResult, ResultMetadata, ResultStatus};

pub struct Dispatcher {
    cache: Arc<TtlCache>,
    limiter: Arc<RateLimiter>,
    limits: LimitsConfig,
}

impl Dispatcher {
    pub fn new(cache: Arc<TtlCache>, limiter: Arc<RateLimiter>, limits: LimitsConfig) -> Self {
        Self {
            cache,
            limiter,
            limits,
        }
    }

    pub async fn dispatch(
        &self,
        connector: &dyn Connector,
        action: &IntentAction,
        ctx: &CallCtx,
    ) -> ConnectorResult {
        let started = Instant::now();
        let name = connector.name();
        let kind = action.kind();

        // 1. schema-time validation
        if let Err(reason) = action.validate() {
            return ConnectorResult::unsupported(name, reason);
        }

        // 2. result cache
        let ttl = connector.ttl_for(action);
        let key = cache_key(
            kind.as_str(),
            &action.params(),
            connector.scope(kind),
            ctx.user.as_str(),
        );
        if ttl > Duration::ZERO {
            if let Some(hit) = self.cache.get(&key) {
                return cached_result(name, hit, started);
            }
        }

        // 3. per-(user, connector) sliding window
        let decision = self.limiter.take(
            &format!("{}|{}", ctx.user, name),
            self.limits.connector_ops_per_window,
            Duration::from_secs(self.limits.connector_window_secs),
        );
        if !decision.allowed {
            return ConnectorResult::rate_limited(name, decision.retry_after.as_secs().max(1));
        }

        // 4. execute under the connector's deadline, honoring cancellation
        let deadline = connector.deadline();
        let outcome = tokio::select! {
            res = tokio::time::timeout(deadline, connector.execute(action, ctx)) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => Err(ConnectorError::Timeout),
                }
            }
            _ = ctx.cancel.cancelled() => {
                return ConnectorResult::upstream_failure(name, "cancelled");
            }
        };

        // 5. normalize, taking the declared fallback on failure
        match outcome {
            Ok(payload) => {
                let result = ConnectorResult {
                    status: if payload.partial {
                        ResultStatus::Partial
                    } else {
                        ResultStatus::Ok
                    },
                    count: payload.results.len(),
                    results: payload.results.clone(),
                    metadata: ResultMetadata {
                        provider: name.to_string(),
                        fallback_used: false,
                        latency_ms: started.elapsed().as_millis() as u64,
                        cost_hint: payload.cost_hint.clone(),
                    },
                    cached: false,
                };
                // 6. cache the clean result
                if ttl > Duration::ZERO && !payload.partial {
                    self.cache.set(
                        &key,
                        json!({"results": payload.results, "cost_hint": payload.cost_hint}),
                        ttl,
                    );
                }
                result
            }
            Err(ConnectorError::QuotaExceeded { retry_after_secs }) => {
                ConnectorResult::rate_limited(name, retry_after_secs)
            }
            Err(ConnectorError::Forbidden(reason)) => {
                ConnectorResult::unsupported(name, format!("forbidden: {reason}"))
            }
            Err(ConnectorError::Invalid(reason)) => ConnectorResult::unsupported(name, reason),
            Err(err) => {
                warn!(connector = name, action = %kind, err = %err, "connector execute failed");
                match connector.fallback(action, ctx).await {
                    Some(payload) => ConnectorResult {
                        status: if payload.partial {
                            ResultStatus::Partial
                        } else {
                            ResultStatus::Ok
                        },
                        count: payload.results.len(),
                        results: payload.results,
                        metadata: ResultMetadata {
                            provider: name.to_string(),
                            fallback_used: true,
                            latency_ms: started.elapsed().as_millis() as u64,
                            cost_hint: payload.cost_hint,
                        },
                        // fallback output never enters the result cache
                        cached: false,
                    },
                    None => ConnectorResult::upstream_failure(name, err.to_string()),
                }
            }
        }
    }
}

fn cached_result(name: &str, hit: Value, started: Instant) -> ConnectorResult {
    let results: Vec<Value> = hit
        .get("results")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();
    let cost_hint = hit
        .get("cost_hint")
        .and_then(|c| c.as_str())
        .map(String::from);
    ConnectorResult {
        status: ResultStatus::Ok,
        count: results.len(),
        results,
        metadata: ResultMetadata {
            provider: name.to_string(),
            fallback_used: false,
            latency_ms: started.elapsed().as_millis() as u64,
            cost_hint,
        },
        cached: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mathia_cache::Scope;
    use mathia_intent::ActionKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::connector::Payload;

    struct StubConnector {
        executes: AtomicU32,
        fail: bool,
        with_fallback: bool,
        slow: bool,
        scope: Scope,
    }

    impl Default for StubConnector {
        fn default() -> Self {
            Self {
                executes: AtomicU32::new(0),
                fail: false,
                with_fallback: false,
                slow: false,
                scope: Scope::User,
            }
        }
    }

    #[async_trait]
    impl Connector for StubConnector {
        fn name(&self) -> &str {
            "stub"
        }
        fn supported_actions(&self) -> &[ActionKind] {
            &[ActionKind::GetWeather]
        }
        fn scope(&self, _action: ActionKind) -> Scope {
            self.scope
        }
        fn deadline(&self) -> Duration {
            Duration::from_millis(100)
        }
        async fn execute(
            &self,
            _action: &IntentAction,
            _ctx: &CallCtx,
        ) -> Result<Payload, ConnectorError> {
            self.executes.fetch_add(1, Ordering::SeqCst);
            if self.slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.fail {
                return Err(ConnectorError::Upstream("boom".to_string()));
            }
            Ok(Payload::new(vec![json!({"temp_c": 24})]))
        }
        async fn fallback(&self, _action: &IntentAction, _ctx: &CallCtx) -> Option<Payload> {
            self.with_fallback
                .then(|| Payload::new(vec![json!({"temp_c": 22, "stale": true})]))
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(TtlCache::new()),
            Arc::new(RateLimiter::new()),
            LimitsConfig::default(),
        )
    }

    fn weather() -> IntentAction {
        IntentAction::GetWeather {
            city: "Nairobi".into(),
        }
    }

    fn ctx() -> CallCtx {
        CallCtx::new("alice".into())
    }

    #[tokio::test]
    async fn ok_result_is_cached_second_call_skips_execute() {
        let d = dispatcher();
        let conn = StubConnector::default();

        let first = d.dispatch(&conn, &weather(), &ctx()).await;
        assert_eq!(first.status, ResultStatus::Ok);
        assert!(!first.cached);

        let second = d.dispatch(&conn, &weather(), &ctx()).await;
        assert!(second.cached);
        assert_eq!(second.count, 1);
        assert_eq!(conn.executes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn user_scope_does_not_leak_across_users() {
        let d = dispatcher();
        let conn = StubConnector::default();

        d.dispatch(&conn, &weather(), &CallCtx::new("alice".into())).await;
        let bob = d
            .dispatch(&conn, &weather(), &CallCtx::new("bob".into()))
            .await;
        // bob's call misses alice's cache entry
        assert!(!bob.cached);
        assert_eq!(conn.executes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn validation_failure_is_unsupported_without_execute() {
        let d = dispatcher();
        let conn = StubConnector::default();
        let bad = IntentAction::SearchFlights {
            origin: "NBO".into(),
            destination: "LHR".into(),
            date: "2025-12-25".into(),
            pax: 0,
        };
        let res = d.dispatch(&conn, &bad, &ctx()).await;
        assert!(matches!(res.status, ResultStatus::Unsupported { .. }));
        assert_eq!(conn.executes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rate_limit_boundary_denies_without_upstream_call() {
        let cache = Arc::new(TtlCache::new());
        let limiter = Arc::new(RateLimiter::new());
        let limits = LimitsConfig {
            connector_ops_per_window: 2,
            ..Default::default()
        };
        let d = Dispatcher::new(cache, limiter, limits);
        // zero TTL so every call reaches the limiter
        struct NoCache(StubConnector);
        #[async_trait]
        impl Connector for NoCache {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn supported_actions(&self) -> &[ActionKind] {
                self.0.supported_actions()
            }
            fn ttl_for(&self, _action: &IntentAction) -> Duration {
                Duration::ZERO
            }
            async fn execute(
                &self,
                action: &IntentAction,
                ctx: &CallCtx,
            ) -> Result<Payload, ConnectorError> {
                self.0.execute(action, ctx).await
            }
        }
        let conn = NoCache(StubConnector::default());

        assert_eq!(
            d.dispatch(&conn, &weather(), &ctx()).await.status,
            ResultStatus::Ok
        );
        assert_eq!(
            d.dispatch(&conn, &weather(), &ctx()).await.status,
            ResultStatus::Ok
        );
        let third = d.dispatch(&conn, &weather(), &ctx()).await;
        assert!(matches!(third.status, ResultStatus::RateLimited { retry_after_secs } if retry_after_secs > 0));
        // the denied call never reached execute
        assert_eq!(conn.0.executes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_with_fallback_marks_fallback_used() {
        let d = dispatcher();
        let conn = StubConnector {
            fail: true,
            with_fallback: true,
            ..Default::default()
        };
        let res = d.dispatch(&conn, &weather(), &ctx()).await;
        assert_eq!(res.status, ResultStatus::Ok);
        assert!(res.metadata.fallback_used);
        assert!(!res.cached);
        assert!(res.count >= 1);

        // fallback output was not cached — the next call executes again
        let again = d.dispatch(&conn, &weather(), &ctx()).await;
        assert!(!again.cached);
        assert_eq!(conn.executes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_without_fallback_is_upstream_failure() {
        let d = dispatcher();
        let conn = StubConnector {
            fail: true,
            ..Default::default()
        };
        let res = d.dispatch(&conn, &weather(), &ctx()).await;
        assert!(matches!(res.status, ResultStatus::UpstreamFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded_is_upstream_failure() {
        let d = dispatcher();
        let conn = StubConnector {
            slow: true,
            ..Default::default()
        };
        let res = d.dispatch(&conn, &weather(), &ctx()).await;
        assert!(matches!(res.status, ResultStatus::UpstreamFailure { .. }));
    }

    #[tokio::test]
    async fn cancellation_stops_the_call() {
        let d = dispatcher();
        let conn = StubConnector {
            slow: true,
            ..Default::default()
        };
        let call_ctx = ctx();
        call_ctx.cancel.cancel();
        let res = d.dispatch(&conn, &weather(), &call_ctx).await;
        assert!(matches!(res.status, ResultStatus::UpstreamFailure { .. }));
    }
}
