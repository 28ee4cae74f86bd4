use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::info;

use crate::error::{EngineError, Result};

/// Initialise the engine schema in `conn`.
///
/// Safe to call on every startup (idempotent). Queue, job and template rows
/// reference each other by id without declared foreign keys: a queue entry
/// whose job vanished must stay representable so `repair::fix` can find it.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_directory_tables(conn)?;
    create_runtemplate_table(conn)?;
    create_job_table(conn)?;
    create_queue_table(conn)?;
    Ok(())
}

/// Applications and companies are owned by external CRUD; the engine only
/// needs their ids and display names.
fn create_directory_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS company (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL,
            slug        TEXT    NOT NULL UNIQUE,
            created_at  TEXT    NOT NULL
        );
        CREATE TABLE IF NOT EXISTS apps (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL,
            uuid        TEXT    NOT NULL UNIQUE,
            created_at  TEXT    NOT NULL
        );",
    )?;
    Ok(())
}

fn create_runtemplate_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS runtemplate (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            name           TEXT    NOT NULL,
            app_id         INTEGER NOT NULL,
            company_id     INTEGER NOT NULL,
            recurrence     TEXT    NOT NULL DEFAULT 'n',  -- interval code or 5-field cron
            active         INTEGER NOT NULL DEFAULT 1,
            next_schedule  TEXT,                          -- UTC or NULL
            env_json       TEXT    NOT NULL DEFAULT '{}',
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_runtemplate_company
            ON runtemplate (company_id);
        CREATE INDEX IF NOT EXISTS idx_runtemplate_due
            ON runtemplate (active, next_schedule);",
    )?;
    Ok(())
}

fn create_job_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS job (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            runtemplate_id  INTEGER NOT NULL,
            app_id          INTEGER NOT NULL,
            scheduled_at    TEXT    NOT NULL,
            executor        TEXT    NOT NULL,
            schedule_type   TEXT    NOT NULL,   -- 'adhoc' | 'recurring'
            exitcode        INTEGER,            -- NULL until the executor reports
            started_at      TEXT,
            ended_at        TEXT,
            env_json        TEXT    NOT NULL DEFAULT '{}',
            created_at      TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_job_runtemplate
            ON job (runtemplate_id, id);",
    )?;
    Ok(())
}

fn create_queue_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS queue (
            id       INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id   INTEGER NOT NULL,
            \"after\"  TEXT    NOT NULL
        );
        -- Pickup polling: SELECT … WHERE after <= ? ORDER BY after
        CREATE INDEX IF NOT EXISTS idx_queue_after ON queue (\"after\");
        CREATE INDEX IF NOT EXISTS idx_queue_job ON queue (job_id);",
    )?;
    Ok(())
}

/// Cloneable handle over the engine's SQLite connection.
///
/// Every operation takes the lock for its full duration, so a multi-row
/// transaction is never interleaved with another operation of this process.
/// Cross-process exclusion relies on `BEGIN IMMEDIATE`.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(path: &str) -> Result<Self> {
        info!(path = %path, "opening SQLite database");
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| EngineError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('company', 'apps', 'runtemplate', 'job', 'queue')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn queue_accepts_entries_without_jobs() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.lock().unwrap();
        conn.execute(
            "INSERT INTO queue (job_id, \"after\") VALUES (999, '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }
}
