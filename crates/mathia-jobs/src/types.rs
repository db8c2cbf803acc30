use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its run_at time.
    Pending,
    /// Claimed by the engine, handler in flight.
    Running,
    /// Handler returned Done.
    Completed,
    /// Handler returned Dead — kept for the alarm log.
    Dead,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "dead" => Ok(JobStatus::Dead),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// What a handler wants done with the job after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Success — mark completed.
    Done,
    /// Transient failure — return to pending after `delay`.
    Retry { delay: Duration },
    /// Permanent failure — dead-letter with alarm.
    Dead,
}

/// Consumer callback. Delivery is at-least-once: implementations must be
/// idempotent (dedup_key or an external ref).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, payload: Value, attempt: u32) -> Outcome;
}

/// Options for `JobQueue::enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOpts {
    pub delay: Option<Duration>,
    pub priority: i32,
    /// While a job with this key is pending or running, further enqueues
    /// with the same key are suppressed.
    pub dedup_key: Option<String>,
}

/// A persisted job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub payload: Value,
    pub status: JobStatus,
    pub priority: i32,
    pub dedup_key: Option<String>,
    /// ISO-8601 timestamp the job becomes runnable.
    pub run_at: String,
    pub attempts: u32,
    pub created_at: String,
    pub updated_at: String,
}
