use rusqlite::{Connection, Result};

/// Initialise the jobs table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id         TEXT PRIMARY KEY,
            name       TEXT NOT NULL,
            payload    TEXT NOT NULL,
            status     TEXT NOT NULL DEFAULT 'pending'
                       CHECK (status IN ('pending','running','completed','dead')),
            priority   INTEGER NOT NULL DEFAULT 0,
            dedup_key  TEXT,
            run_at     TEXT NOT NULL,
            attempts   INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_runnable
            ON jobs(status, run_at, priority);
        CREATE INDEX IF NOT EXISTS idx_jobs_dedup
            ON jobs(dedup_key) WHERE dedup_key IS NOT NULL;",
    )
}
