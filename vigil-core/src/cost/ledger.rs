//! Append-only record of accounted model calls.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::error::StoreError;

/// One accounted model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub agent: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_estimate: f64,
    pub timestamp: DateTime<Utc>,
}

/// Append-only usage storage.
pub trait UsageLedger: Send + Sync {
    fn append(&self, entry: &UsageEntry) -> Result<(), StoreError>;

    /// All entries, oldest first.
    fn entries(&self) -> Result<Vec<UsageEntry>, StoreError>;

    fn total_cost(&self) -> Result<f64, StoreError> {
        Ok(self.entries()?.iter().map(|e| e.cost_estimate).sum())
    }
}

/// Process-local ledger, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryUsageLedger {
    entries: Mutex<Vec<UsageEntry>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UsageLedger for InMemoryUsageLedger {
    fn append(&self, entry: &UsageEntry) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }

    fn entries(&self) -> Result<Vec<UsageEntry>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

/// SQLite-backed ledger in a `token_usage` table.
pub struct SqliteUsageLedger {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteUsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteUsageLedger").finish_non_exhaustive()
    }
}

fn db_error(e: rusqlite::Error) -> StoreError {
    StoreError::Database {
        message: e.to_string(),
    }
}

impl SqliteUsageLedger {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path).map_err(db_error)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(db_error)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS token_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                agent TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                cost_estimate REAL NOT NULL
            );",
        )
        .map_err(db_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl UsageLedger for SqliteUsageLedger {
    fn append(&self, entry: &UsageEntry) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO token_usage
                (timestamp, agent, model, prompt_tokens, completion_tokens, total_tokens, cost_estimate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.timestamp.to_rfc3339(),
                entry.agent,
                entry.model,
                entry.prompt_tokens as i64,
                entry.completion_tokens as i64,
                entry.total_tokens as i64,
                entry.cost_estimate,
            ],
        )
        .map_err(db_error)?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<UsageEntry>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, agent, model, prompt_tokens, completion_tokens, total_tokens, cost_estimate
                 FROM token_usage ORDER BY id",
            )
            .map_err(db_error)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, f64>(6)?,
                ))
            })
            .map_err(db_error)?;

        let mut entries = Vec::new();
        for row in rows {
            let (ts, agent, model, prompt, completion, total, cost) = row.map_err(db_error)?;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| StoreError::Corrupt {
                    doc_id: format!("token_usage@{ts}"),
                    message: e.to_string(),
                })?
                .with_timezone(&Utc);
            entries.push(UsageEntry {
                agent,
                model,
                prompt_tokens: prompt.max(0) as u64,
                completion_tokens: completion.max(0) as u64,
                total_tokens: total.max(0) as u64,
                cost_estimate: cost,
                timestamp,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(agent: &str, total: u64) -> UsageEntry {
        UsageEntry {
            agent: agent.into(),
            model: "stub-v1".into(),
            prompt_tokens: total / 2,
            completion_tokens: total - total / 2,
            total_tokens: total,
            cost_estimate: total as f64 / 1000.0 * 0.002,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_in_memory_append_and_total() {
        let ledger = InMemoryUsageLedger::new();
        ledger.append(&entry("analyst", 1000)).unwrap();
        ledger.append(&entry("planner", 500)).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!((ledger.total_cost().unwrap() - 0.003).abs() < 1e-12);
    }

    #[test]
    fn test_sqlite_roundtrip_preserves_order() {
        let ledger = SqliteUsageLedger::open_in_memory().unwrap();
        ledger.append(&entry("analyst", 18)).unwrap();
        ledger.append(&entry("guardrail", 30)).unwrap();

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].agent, "analyst");
        assert_eq!(entries[1].total_tokens, 30);
    }

    #[test]
    fn test_sqlite_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");
        {
            let ledger = SqliteUsageLedger::open(&path).unwrap();
            ledger.append(&entry("planner", 100)).unwrap();
        }
        let reopened = SqliteUsageLedger::open(&path).unwrap();
        assert_eq!(reopened.entries().unwrap().len(), 1);
    }
}
