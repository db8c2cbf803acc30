use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_users(conn)?;
    create_sessions(conn)?;
    create_rooms(conn)?;
    create_memberships(conn)?;
    create_messages(conn)?;
    create_room_keys(conn)?;
    create_reminders(conn)?;
    create_wallets(conn)?;
    create_connector_usage(conn)?;
    create_credentials(conn)?;
    create_pins(conn)?;
    Ok(())
}

fn create_users(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            username      TEXT NOT NULL UNIQUE,
            email         TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            active        INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL
        );",
    )
}

fn create_sessions(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            token       TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL,
            expires_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id);",
    )
}

fn create_rooms(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS rooms (
            id           TEXT PRIMARY KEY,
            kind         TEXT NOT NULL CHECK (kind IN ('direct','group','ai')),
            display_name TEXT NOT NULL,
            owner_id     TEXT NOT NULL REFERENCES users(id),
            archived     INTEGER NOT NULL DEFAULT 0,
            summary      TEXT,
            created_at   TEXT NOT NULL
        );
        -- exactly one assistant room per user
        CREATE UNIQUE INDEX IF NOT EXISTS idx_rooms_one_ai_per_owner
            ON rooms(owner_id) WHERE kind = 'ai';",
    )
}

fn create_memberships(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memberships (
            room_id      TEXT NOT NULL REFERENCES rooms(id),
            user_id      TEXT NOT NULL REFERENCES users(id),
            role         TEXT NOT NULL CHECK (role IN ('owner','member','guest')),
            joined_at    TEXT NOT NULL,
            last_read_at TEXT,
            UNIQUE(room_id, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_memberships_user
            ON memberships(user_id);",
    )
}

fn create_messages(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            sender_id   TEXT NOT NULL REFERENCES users(id),
            ciphertext  BLOB NOT NULL,
            nonce       BLOB NOT NULL,
            key_version INTEGER NOT NULL,
            ts          TEXT NOT NULL,
            parent_id   TEXT REFERENCES messages(id),
            flags       INTEGER NOT NULL DEFAULT 0,
            deleted     INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_messages_room_ts
            ON messages(room_id, ts, id);",
    )
}

fn create_room_keys(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS room_keys (
            room_id    TEXT NOT NULL REFERENCES rooms(id),
            version    INTEGER NOT NULL,
            wrapped    BLOB NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(room_id, version)
        );",
    )
}

fn create_reminders(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reminders (
            id         TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL REFERENCES users(id),
            room_id    TEXT NOT NULL REFERENCES rooms(id),
            content    TEXT NOT NULL,
            due_at     TEXT NOT NULL,
            channel    TEXT NOT NULL CHECK (channel IN ('inapp','email','whatsapp','both')),
            status     TEXT NOT NULL DEFAULT 'pending'
                       CHECK (status IN ('pending','dispatching','fired','failed','canceled')),
            attempts   INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reminders_due
            ON reminders(status, due_at);",
    )
}

fn create_wallets(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS wallets (
            user_id       TEXT NOT NULL REFERENCES users(id),
            currency      TEXT NOT NULL,
            balance_minor INTEGER NOT NULL DEFAULT 0,
            overdraft     INTEGER NOT NULL DEFAULT 0,
            updated_at    TEXT NOT NULL,
            UNIQUE(user_id, currency)
        );
        CREATE TABLE IF NOT EXISTS wallet_txns (
            id              TEXT PRIMARY KEY,
            wallet_user     TEXT NOT NULL,
            wallet_currency TEXT NOT NULL,
            delta_minor     INTEGER NOT NULL,
            reason          TEXT NOT NULL,
            external_ref    TEXT UNIQUE,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_wallet_txns_wallet
            ON wallet_txns(wallet_user, wallet_currency, created_at DESC);",
    )
}

fn create_connector_usage(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS connector_usage (
            user_id      TEXT NOT NULL,
            connector    TEXT NOT NULL,
            window_start TEXT NOT NULL,
            count        INTEGER NOT NULL DEFAULT 0,
            UNIQUE(user_id, connector, window_start)
        );",
    )
}

fn create_pins(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS pins (
            room_id    TEXT NOT NULL REFERENCES rooms(id),
            message_id TEXT NOT NULL REFERENCES messages(id),
            pinned_by  TEXT NOT NULL REFERENCES users(id),
            created_at TEXT NOT NULL,
            UNIQUE(room_id, message_id)
        );",
    )
}

fn create_credentials(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS credentials (
            user_id    TEXT NOT NULL REFERENCES users(id),
            provider   TEXT NOT NULL,
            ciphertext BLOB NOT NULL,
            nonce      BLOB NOT NULL,
            expires_at TEXT,
            UNIQUE(user_id, provider)
        );",
    )
}
