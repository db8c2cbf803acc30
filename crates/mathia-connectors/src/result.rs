use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged outcome of a connector call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    RateLimited { retry_after_secs: u64 },
    Unsupported { reason: String },
    UpstreamFailure { reason: String },
    /// Degraded outcome: the side effect or result set is incomplete
    /// (e.g. a send queued for retry instead of delivered). Never cached.
    Partial,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub provider: String,
    pub fallback_used: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_hint: Option<String>,
}

/// The uniform envelope every connector call resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorResult {
    #[serde(flatten)]
    pub status: ResultStatus,
    pub count: usize,
    pub results: Vec<Value>,
    pub metadata: ResultMetadata,
    pub cached: bool,
}

impl ConnectorResult {
    pub fn ok(provider: &str, results: Vec<Value>) -> Self {
        Self {
            status: ResultStatus::Ok,
            count: results.len(),
            results,
            metadata: ResultMetadata {
                provider: provider.to_string(),
                ..Default::default()
            },
            cached: false,
        }
    }

    pub fn rate_limited(provider: &str, retry_after_secs: u64) -> Self {
        Self {
            status: ResultStatus::RateLimited { retry_after_secs },
            count: 0,
            results: Vec::new(),
            metadata: ResultMetadata {
                provider: provider.to_string(),
                ..Default::default()
            },
            cached: false,
        }
    }

    pub fn unsupported(provider: &str, reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Unsupported {
                reason: reason.into(),
            },
            count: 0,
            results: Vec::new(),
            metadata: ResultMetadata {
                provider: provider.to_string(),
                ..Default::default()
            },
            cached: false,
        }
    }

    pub fn upstream_failure(provider: &str, reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::UpstreamFailure {
                reason: reason.into(),
            },
            count: 0,
            results: Vec::new(),
            metadata: ResultMetadata {
                provider: provider.to_string(),
                ..Default::default()
            },
            cached: false,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.status {
            ResultStatus::Ok => "ok",
            ResultStatus::RateLimited { .. } => "rate_limited",
            ResultStatus::Unsupported { .. } => "unsupported",
            ResultStatus::UpstreamFailure { .. } => "upstream_failure",
            ResultStatus::Partial => "partial",
        }
    }
}
