use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{CompletionRequest, CompletionResponse, LlmProvider, ProviderError};
use crate::stream::StreamEvent;

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_JITTER_MS: i64 = 50;

/// Wraps a primary provider with transport-retry and a single-shot
/// secondary fallback.
///
/// The primary is retried up to 3 times on transport errors with
/// exponential backoff (200 ms × 2ⁿ, jitter ±50 ms). If it still fails
/// with a 5xx or timeout, the secondary is attempted exactly once. The
/// consumer observes one logical request either way.
pub struct FallbackClient {
    primary: Box<dyn LlmProvider>,
    secondary: Option<Box<dyn LlmProvider>>,
    /// Per-attempt deadline.
    deadline: Duration,
}

impl FallbackClient {
    pub fn new(
        primary: Box<dyn LlmProvider>,
        secondary: Option<Box<dyn LlmProvider>>,
        deadline: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            deadline,
        }
    }

    fn backoff(attempt: u32) -> Duration {
        let base = BACKOFF_BASE_MS * (1 << attempt);
        let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER_MS..=BACKOFF_JITTER_MS);
        Duration::from_millis((base as i64 + jitter).max(0) as u64)
    }
}

#[async_trait]
impl LlmProvider for FallbackClient {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn complete(
        &self,
        req: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=MAX_RETRIES {
            match tokio::time::timeout(self.deadline, self.primary.complete(req, cancel)).await {
                Ok(Ok(resp)) => {
                    if attempt > 0 {
                        info!(provider = %self.primary.name(), attempt, "request succeeded after retry");
                    }
                    return Ok(resp);
                }
                Ok(Err(e)) => {
                    warn!(provider = %self.primary.name(), attempt, err = %e, "provider complete failed");
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
                Err(_) => {
                    warn!(provider = %self.primary.name(), attempt, "provider deadline exceeded");
                    last_err = Some(ProviderError::Timeout);
                }
            }

            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(Self::backoff(attempt)).await;
            }
        }

        if let Some(ref secondary) = self.secondary {
            info!(provider = %secondary.name(), "primary exhausted, trying secondary once");
            match tokio::time::timeout(self.deadline, secondary.complete(req, cancel)).await {
                Ok(res) => return res,
                Err(_) => return Err(ProviderError::Timeout),
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all providers failed".to_string())))
    }

    async fn complete_stream(
        &self,
        req: &CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=MAX_RETRIES {
            match tokio::time::timeout(
                self.deadline,
                self.primary.complete_stream(req, tx.clone(), cancel),
            )
            .await
            {
                Ok(Ok(())) => {
                    if attempt > 0 {
                        info!(provider = %self.primary.name(), attempt, "stream succeeded after retry");
                    }
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(provider = %self.primary.name(), attempt, err = %e, "provider stream failed");
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
                Err(_) => {
                    warn!(provider = %self.primary.name(), attempt, "stream deadline exceeded");
                    last_err = Some(ProviderError::Timeout);
                }
            }

            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(Self::backoff(attempt)).await;
            }
        }

        if let Some(ref secondary) = self.secondary {
            info!(provider = %secondary.name(), "primary exhausted, trying secondary stream once");
            match tokio::time::timeout(
                self.deadline,
                secondary.complete_stream(req, tx, cancel),
            )
            .await
            {
                Ok(res) => return res,
                Err(_) => return Err(ProviderError::Timeout),
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("all providers failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Message, Mode, Role};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct AlwaysFail {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LlmProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn complete(
            &self,
            _req: &CompletionRequest,
            _cancel: &CancellationToken,
        ) -> Result<CompletionResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Api {
                status: 503,
                message: "unavailable".to_string(),
            })
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl LlmProvider for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        async fn complete(
            &self,
            req: &CompletionRequest,
            _cancel: &CancellationToken,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: "ok".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
            })
        }
    }

    struct BadRequest;

    #[async_trait]
    impl LlmProvider for BadRequest {
        fn name(&self) -> &str {
            "bad-request"
        }
        async fn complete(
            &self,
            _req: &CompletionRequest,
            _cancel: &CancellationToken,
        ) -> Result<CompletionResponse, ProviderError> {
            Err(ProviderError::Api {
                status: 400,
                message: "bad".to_string(),
            })
        }
    }

    fn dummy_request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            system: "You are a test.".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: "hello".to_string(),
            }],
            max_tokens: 64,
            temperature: 0.0,
            mode: Mode::Text,
        }
    }

    #[tokio::test]
    async fn falls_back_to_secondary_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = FallbackClient::new(
            Box::new(AlwaysFail {
                calls: calls.clone(),
            }),
            Some(Box::new(AlwaysOk)),
            Duration::from_secs(5),
        );

        let result = client
            .complete(&dummy_request(), &CancellationToken::new())
            .await;
        assert_eq!(result.unwrap().content, "ok");
        // primary: initial attempt + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn errors_when_all_fail() {
        let client = FallbackClient::new(
            Box::new(AlwaysFail {
                calls: Arc::new(AtomicU32::new(0)),
            }),
            None,
            Duration::from_secs(5),
        );
        let result = client
            .complete(&dummy_request(), &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let client = FallbackClient::new(
            Box::new(BadRequest),
            Some(Box::new(AlwaysOk)),
            Duration::from_secs(5),
        );
        let result = client
            .complete(&dummy_request(), &CancellationToken::new())
            .await;
        // 400 propagates immediately — no retry, no fallback
        assert!(matches!(
            result,
            Err(ProviderError::Api { status: 400, .. })
        ));
    }

    #[test]
    fn backoff_grows_with_jitter_bounds() {
        for attempt in 0..3 {
            let base = 200u64 * (1 << attempt);
            let d = FallbackClient::backoff(attempt).as_millis() as i64;
            assert!((d - base as i64).abs() <= 50, "attempt {attempt}: {d}ms");
        }
    }
}
