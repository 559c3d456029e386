//! Durable FIFO of operations awaiting replay

use crate::db::{storage_err, LocalStore};
use crate::ops::Operation;
use chrono::{DateTime, Utc};
use fin_common::{FinError, Result};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Pending,
    /// Exceeded the retry budget; kept for inspection until re-armed
    Failed,
}

impl OpStatus {
    fn as_str(&self) -> &'static str {
        match self {
            OpStatus::Pending => "pending",
            OpStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    pub operation: Operation,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub status: OpStatus,
}

impl QueuedOperation {
    pub fn new(operation: Operation) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
            status: OpStatus::Pending,
        }
    }
}

/// Queue row before the payload is decoded
struct RawEntry {
    id: String,
    payload: String,
    created_at: String,
    retry_count: u32,
    last_error: Option<String>,
    status: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            created_at: row.get(2)?,
            retry_count: row.get(3)?,
            last_error: row.get(4)?,
            status: row.get(5)?,
        })
    }

    fn decode(self) -> Result<QueuedOperation> {
        Ok(QueuedOperation {
            operation: serde_json::from_str(&self.payload).map_err(FinError::from)?,
            id: self.id,
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            retry_count: self.retry_count,
            last_error: self.last_error,
            status: if self.status == "failed" { OpStatus::Failed } else { OpStatus::Pending },
        })
    }
}

/// Queue view over the local store
pub struct OfflineQueue<'a> {
    store: &'a LocalStore,
}

impl<'a> OfflineQueue<'a> {
    pub fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    /// Durably append an operation. Returns only once the row is committed.
    pub fn enqueue(&self, operation: Operation) -> Result<QueuedOperation> {
        let entry = QueuedOperation::new(operation);
        self.insert(&entry)?;
        tracing::info!("Queued {} operation {}", entry.operation.op_type(), entry.id);
        Ok(entry)
    }

    fn insert(&self, entry: &QueuedOperation) -> Result<()> {
        let payload = serde_json::to_string(&entry.operation)?;
        self.store
            .conn()
            .execute(
                "INSERT INTO op_queue (id, op_type, payload, created_at, retry_count, last_error, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.id,
                    entry.operation.op_type(),
                    payload,
                    entry.created_at.to_rfc3339(),
                    entry.retry_count,
                    entry.last_error,
                    entry.status.as_str(),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Pending operations in insertion order
    pub fn get_all(&self) -> Result<Vec<QueuedOperation>> {
        self.select("WHERE status = 'pending'")
    }

    pub fn failed(&self) -> Result<Vec<QueuedOperation>> {
        self.select("WHERE status = 'failed'")
    }

    fn select(&self, filter: &str) -> Result<Vec<QueuedOperation>> {
        let sql = format!(
            "SELECT id, payload, created_at, retry_count, last_error, status
             FROM op_queue {} ORDER BY seq",
            filter
        );
        let mut stmt = self.store.conn().prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map([], RawEntry::from_row)
            .map_err(storage_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err)?;

        rows.into_iter().map(RawEntry::decode).collect()
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let n = self
            .store
            .conn()
            .execute("DELETE FROM op_queue WHERE id = ?1", [id])
            .map_err(storage_err)?;
        Ok(n > 0)
    }

    /// Persist an operation whose references were rewritten.
    pub fn update_operation(&self, id: &str, operation: &Operation) -> Result<()> {
        self.store
            .conn()
            .execute(
                "UPDATE op_queue SET payload = ?2 WHERE id = ?1",
                params![id, serde_json::to_string(operation)?],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Record a failed replay. Parks the entry once `max_retries` is reached.
    pub fn mark_failed(&self, id: &str, error: &str, max_retries: u32) -> Result<OpStatus> {
        let conn = self.store.conn();
        conn.execute(
            "UPDATE op_queue SET retry_count = retry_count + 1, last_error = ?2 WHERE id = ?1",
            params![id, error],
        )
        .map_err(storage_err)?;

        let retries: u32 = conn
            .query_row("SELECT retry_count FROM op_queue WHERE id = ?1", [id], |row| row.get(0))
            .map_err(storage_err)?;

        if retries >= max_retries {
            self.park(id, error)?;
            tracing::warn!("Operation {} failed {} times, parked: {}", id, retries, error);
            Ok(OpStatus::Failed)
        } else {
            Ok(OpStatus::Pending)
        }
    }

    /// Move an entry out of the replay set without touching its retry count.
    pub fn park(&self, id: &str, reason: &str) -> Result<()> {
        self.store
            .conn()
            .execute(
                "UPDATE op_queue SET status = 'failed', last_error = ?2 WHERE id = ?1",
                params![id, reason],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Re-arm every parked entry for replay
    pub fn retry_failed(&self) -> Result<usize> {
        let n = self
            .store
            .conn()
            .execute(
                "UPDATE op_queue SET status = 'pending', retry_count = 0 WHERE status = 'failed'",
                [],
            )
            .map_err(storage_err)?;
        Ok(n)
    }

}
