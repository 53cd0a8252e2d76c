//! SQLite-backed store.
//!
//! Every statement runs on the blocking pool; the connection sits behind a
//! mutex so statements from concurrent tasks serialize.

use async_trait::async_trait;
use audit_core::{Outcome, Prompt, PromptId};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::{OutcomeSink, PromptSource, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS prompts (
    prompt_id INTEGER PRIMARY KEY,
    experiment_type TEXT NOT NULL,
    system_message TEXT NOT NULL,
    prompt TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS requests (
    request_id INTEGER PRIMARY KEY,
    prompt_id INTEGER NOT NULL REFERENCES prompts(prompt_id),
    model TEXT NOT NULL,
    raw_response TEXT,
    error BOOLEAN NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(prompt_id, model)
);
CREATE INDEX IF NOT EXISTS idx_prompts_experiment ON prompts(experiment_type);
";

/// Prompts and outcomes in one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Opening result store");
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Add a prompt for `experiment` and return its id.
    pub async fn insert_prompt(
        &self,
        experiment: &str,
        system_message: &str,
        prompt: &str,
    ) -> Result<PromptId, StoreError> {
        let (experiment, system_message, prompt) =
            (experiment.to_string(), system_message.to_string(), prompt.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO prompts (experiment_type, system_message, prompt) VALUES (?1, ?2, ?3)",
                params![experiment, system_message, prompt],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// All outcomes recorded for `model`, ordered by prompt id.
    pub async fn outcomes(&self, model: &str) -> Result<Vec<Outcome>, StoreError> {
        let model = model.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT prompt_id, model, raw_response, error, error_message
                 FROM requests WHERE model = ?1 ORDER BY prompt_id",
            )?;
            let rows = stmt.query_map(params![model], |row| {
                Ok(Outcome {
                    prompt_id: row.get(0)?,
                    model: row.get(1)?,
                    raw_response: row.get(2)?,
                    error: row.get(3)?,
                    error_message: row.get(4)?,
                })
            })?;
            let outcomes = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(outcomes)
        })
        .await
    }
}

/// Create tables and indexes if missing. Safe to run on every open.
fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[async_trait]
impl OutcomeSink for SqliteStore {
    async fn record(&self, outcome: &Outcome) -> Result<(), StoreError> {
        let outcome = outcome.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO requests
                     (prompt_id, model, raw_response, error, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    outcome.prompt_id,
                    outcome.model,
                    outcome.raw_response,
                    outcome.error,
                    outcome.error_message,
                    chrono::Utc::now().to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::Duplicate {
                        prompt_id: outcome.prompt_id,
                        model: outcome.model,
                    })
                }
                Err(e) => return Err(e.into()),
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl PromptSource for SqliteStore {
    async fn pending_prompts(
        &self,
        experiment: &str,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Prompt>, StoreError> {
        let (experiment, model) = (experiment.to_string(), model.to_string());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.prompt_id, p.system_message, p.prompt
                 FROM prompts p
                 LEFT JOIN requests r ON r.prompt_id = p.prompt_id AND r.model = ?2
                 WHERE p.experiment_type = ?1 AND r.request_id IS NULL
                 ORDER BY p.prompt_id
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![experiment, model, limit], |row| {
                Ok(Prompt {
                    id: row.get(0)?,
                    system_message: row.get(1)?,
                    body: row.get(2)?,
                })
            })?;
            let prompts = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(prompts)
        })
        .await
    }
}
