use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{JobError, Result};
use crate::types::{EnqueueOpts, JobHandler, JobRecord, JobStatus, Outcome};

/// Shared handle for submitting work while the engine loop runs.
///
/// Cloneable; wraps the same `Connection` the engine polls so dedup checks
/// and claims are serialized on one writer.
#[derive(Clone)]
pub struct JobQueue {
    conn: Arc<Mutex<Connection>>,
}

impl JobQueue {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Submit a job. Returns `None` when a live job with the same dedup
    /// key suppressed the enqueue.
    pub fn enqueue(
        &self,
        name: &str,
        payload: Value,
        opts: EnqueueOpts,
    ) -> Result<Option<JobRecord>> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let run_at = match opts.delay {
            Some(d) => (now + chrono::Duration::from_std(d).unwrap_or_default()).to_rfc3339(),
            None => now_str.clone(),
        };

        let conn = self.conn.lock().unwrap();

        if let Some(ref key) = opts.dedup_key {
            let live: i64 = conn.query_row(
                "SELECT COUNT(*) FROM jobs
                 WHERE dedup_key = ?1 AND status IN ('pending','running')",
                rusqlite::params![key],
                |row| row.get(0),
            )?;
            if live > 0 {
                return Ok(None);
            }
        }

        let id = Uuid::now_v7().to_string();
        let payload_str =
            serde_json::to_string(&payload).map_err(|e| JobError::InvalidPayload(e.to_string()))?;
        conn.execute(
            "INSERT INTO jobs
             (id, name, payload, status, priority, dedup_key, run_at, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, 0, ?7, ?7)",
            rusqlite::params![id, name, payload_str, opts.priority, opts.dedup_key, run_at, now_str],
        )?;

        info!(job_id = %id, %name, "job enqueued");
        Ok(Some(JobRecord {
            id,
            name: name.to_string(),
            payload,
            status: JobStatus::Pending,
            priority: opts.priority,
            dedup_key: opts.dedup_key,
            run_at,
            attempts: 0,
            created_at: now_str.clone(),
            updated_at: now_str,
        }))
    }

    /// Claim up to `limit` runnable jobs: pending, run_at arrived, highest
    /// priority first. The pending→running flip is the claim — a job is
    /// handed to exactly one handler task per attempt.
    fn claim_due(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let now_str = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();

        let due: Vec<(String, String, String, i32, Option<String>, String, u32, String)> = {
            let mut stmt = conn.prepare_cached(
                "SELECT id, name, payload, priority, dedup_key, run_at, attempts, created_at
                 FROM jobs
                 WHERE status = 'pending' AND run_at <= ?1
                 ORDER BY priority DESC, run_at LIMIT ?2",
            )?;
            let rows: Vec<_> = stmt
                .query_map(rusqlite::params![now_str, limit as i64], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get::<_, i64>(6)? as u32,
                        row.get(7)?,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut claimed = Vec::with_capacity(due.len());
        for (id, name, payload_str, priority, dedup_key, run_at, attempts, created_at) in due {
            let n = conn.execute(
                "UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![now_str, id],
            )?;
            if n == 0 {
                continue; // another worker got it
            }
            let payload: Value = serde_json::from_str(&payload_str).unwrap_or(Value::Null);
            claimed.push(JobRecord {
                id,
                name,
                payload,
                status: JobStatus::Running,
                priority,
                dedup_key,
                run_at,
                attempts: attempts + 1,
                created_at,
                updated_at: now_str.clone(),
            });
        }
        Ok(claimed)
    }

    fn settle(&self, id: &str, outcome: &Outcome) -> Result<()> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let conn = self.conn.lock().unwrap();
        match outcome {
            Outcome::Done => {
                conn.execute(
                    "UPDATE jobs SET status = 'completed', updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![now_str, id],
                )?;
            }
            Outcome::Retry { delay } => {
                let next =
                    (now + chrono::Duration::from_std(*delay).unwrap_or_default()).to_rfc3339();
                conn.execute(
                    "UPDATE jobs SET status = 'pending', run_at = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![next, now_str, id],
                )?;
            }
            Outcome::Dead => {
                warn!(job_id = %id, "job dead-lettered");
                conn.execute(
                    "UPDATE jobs SET status = 'dead', updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![now_str, id],
                )?;
            }
        }
        Ok(())
    }

    /// Pending jobs, soonest first, for inspection.
    pub fn pending_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, payload, status, priority, dedup_key, run_at, attempts, created_at, updated_at
             FROM jobs WHERE status = 'pending' ORDER BY run_at LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_job)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Jobs in the dead-letter state, for the alarm surface.
    pub fn dead_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, payload, status, priority, dedup_key, run_at, attempts, created_at, updated_at
             FROM jobs WHERE status = 'dead' ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_job)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_job(&self, id: &str) -> Result<JobRecord> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, payload, status, priority, dedup_key, run_at, attempts, created_at, updated_at
             FROM jobs WHERE id = ?1",
            rusqlite::params![id],
            row_to_job,
        )
        .map_err(|_| JobError::JobNotFound { id: id.to_string() })
    }

    /// On startup, running rows are orphans from a crashed worker — return
    /// them to pending so at-least-once holds across restarts.
    fn recover_orphans(&self) -> Result<usize> {
        let now_str = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE jobs SET status = 'pending', updated_at = ?1 WHERE status = 'running'",
            rusqlite::params![now_str],
        )?;
        Ok(n)
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let status_str: String = row.get(3)?;
    let payload_str: String = row.get(2)?;
    Ok(JobRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        payload: serde_json::from_str(&payload_str).unwrap_or(Value::Null),
        status: status_str.parse().unwrap_or(JobStatus::Pending),
        priority: row.get(4)?,
        dedup_key: row.get(5)?,
        run_at: row.get(6)?,
        attempts: row.get::<_, i64>(7)? as u32,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// A periodic schedule registered at startup.
struct Periodic {
    name: String,
    every: Duration,
    next_at: tokio::time::Instant,
}

/// Polls the queue every second and drives handler tasks.
pub struct JobEngine {
    queue: JobQueue,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    periodics: Vec<Periodic>,
    claim_batch: usize,
}

impl JobEngine {
    pub fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            periodics: Vec::new(),
            claim_batch: 16,
        }
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Enqueue `name` every `every`, starting one interval from now.
    pub fn schedule_periodic(&mut self, name: &str, every: Duration) {
        self.periodics.push(Periodic {
            name: name.to_string(),
            every,
            next_at: tokio::time::Instant::now() + every,
        });
    }

    /// Main loop. Polls every second until `shutdown` broadcasts `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("job engine started");
        match self.queue.recover_orphans() {
            Ok(n) if n > 0 => warn!(count = n, "orphaned running jobs recovered"),
            Err(e) => error!("orphan recovery failed: {e}"),
            _ => {}
        }

        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.fire_periodics();
                    if let Err(e) = self.tick() {
                        error!("job engine tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("job engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn fire_periodics(&mut self) {
        let now = tokio::time::Instant::now();
        for p in &mut self.periodics {
            if now < p.next_at {
                continue;
            }
            p.next_at = now + p.every;
            // dedup on the job name keeps a slow run from stacking up
            let res = self.queue.enqueue(
                &p.name,
                Value::Object(Default::default()),
                EnqueueOpts {
                    dedup_key: Some(format!("periodic:{}", p.name)),
                    ..Default::default()
                },
            );
            if let Err(e) = res {
                error!(job = %p.name, "periodic enqueue failed: {e}");
            }
        }
    }

    /// Claim due jobs and spawn their handlers. Handlers run detached so a
    /// slow consumer never stalls the tick.
    fn tick(&self) -> Result<()> {
        let claimed = self.queue.claim_due(self.claim_batch)?;
        for job in claimed {
            let Some(handler) = self.handlers.get(&job.name).cloned() else {
                warn!(job_id = %job.id, name = %job.name, "no handler, dead-lettering");
                self.queue.settle(&job.id, &Outcome::Dead)?;
                continue;
            };
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let outcome = handler.run(job.payload.clone(), job.attempts).await;
                if let Err(e) = queue.settle(&job.id, &outcome) {
                    error!(job_id = %job.id, "failed to settle job: {e}");
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        runs: Arc<AtomicU32>,
        outcome: Outcome,
    }

    #[async_trait]
    impl JobHandler for Counting {
        async fn run(&self, _payload: Value, _attempt: u32) -> Outcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn queue() -> JobQueue {
        JobQueue::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn dedup_suppresses_live_duplicates() {
        let q = queue();
        let opts = EnqueueOpts {
            dedup_key: Some("remind:42".to_string()),
            ..Default::default()
        };
        assert!(q
            .enqueue("reminder", serde_json::json!({"id": 42}), opts.clone())
            .unwrap()
            .is_some());
        assert!(q
            .enqueue("reminder", serde_json::json!({"id": 42}), opts)
            .unwrap()
            .is_none());
    }

    #[test]
    fn delayed_jobs_are_not_claimed_early() {
        let q = queue();
        q.enqueue(
            "later",
            Value::Null,
            EnqueueOpts {
                delay: Some(Duration::from_secs(3600)),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(q.claim_due(10).unwrap().is_empty());
    }

    #[test]
    fn claim_increments_attempts_and_is_exclusive() {
        let q = queue();
        let job = q
            .enqueue("work", Value::Null, EnqueueOpts::default())
            .unwrap()
            .unwrap();

        let claimed = q.claim_due(10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);
        // already running — not claimable again
        assert!(q.claim_due(10).unwrap().is_empty());

        q.settle(&job.id, &Outcome::Retry { delay: Duration::ZERO }).unwrap();
        let reclaimed = q.claim_due(10).unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[test]
    fn settle_outcomes() {
        let q = queue();
        let a = q.enqueue("a", Value::Null, EnqueueOpts::default()).unwrap().unwrap();
        let b = q.enqueue("b", Value::Null, EnqueueOpts::default()).unwrap().unwrap();
        q.claim_due(10).unwrap();

        q.settle(&a.id, &Outcome::Done).unwrap();
        q.settle(&b.id, &Outcome::Dead).unwrap();

        assert_eq!(q.get_job(&a.id).unwrap().status, JobStatus::Completed);
        assert_eq!(q.get_job(&b.id).unwrap().status, JobStatus::Dead);
        assert_eq!(q.dead_jobs(10).unwrap().len(), 1);
    }

    #[test]
    fn orphan_recovery_returns_running_to_pending() {
        let q = queue();
        q.enqueue("work", Value::Null, EnqueueOpts::default()).unwrap();
        q.claim_due(10).unwrap();
        assert_eq!(q.recover_orphans().unwrap(), 1);
        assert_eq!(q.claim_due(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn engine_runs_handlers() {
        let q = queue();
        let runs = Arc::new(AtomicU32::new(0));
        let mut engine = JobEngine::new(q.clone());
        engine.register(
            "count",
            Arc::new(Counting {
                runs: runs.clone(),
                outcome: Outcome::Done,
            }),
        );
        let job = q
            .enqueue("count", Value::Null, EnqueueOpts::default())
            .unwrap()
            .unwrap();

        engine.tick().unwrap();
        // handler runs on a spawned task
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(q.get_job(&job.id).unwrap().status, JobStatus::Completed);
    }
}
