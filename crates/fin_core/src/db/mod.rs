//! SQLite-backed local durable store
//!
//! Holds the cached entity collections, the offline operation queue and the
//! temp-id mapping table. A `LocalStore` is owned by exactly one task (the
//! sync engine), which serialises all access to it.

use crate::effects::Effect;
use crate::ops::IdMap;
use fin_common::{Account, Collection, FinError, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

/// Row fields that may hold another entity's id
const REFERENCE_FIELDS: [&str; 6] = [
    "id",
    "account_id",
    "category_id",
    "to_account_id",
    "linked_transaction_id",
    "parent_transaction_id",
];

pub(crate) fn storage_err(e: rusqlite::Error) -> FinError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DiskFull) => FinError::StorageFull,
        _ => FinError::Storage(e.to_string()),
    }
}

pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        let store = Self::init(conn)?;
        tracing::info!("Local store opened at {:?}", path);
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(storage_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))
            .map_err(storage_err)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn get_entity(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM entities WHERE collection = ?1 AND id = ?2",
                params![collection.table(), id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        data.map(|d| serde_json::from_str(&d).map_err(FinError::from))
            .transpose()
    }

    pub fn get_typed<T: DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<Option<T>> {
        self.get_entity(collection, id)?
            .map(|v| serde_json::from_value(v).map_err(FinError::from))
            .transpose()
    }

    pub fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM entities WHERE collection = ?1 ORDER BY updated_at DESC, id")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([collection.table()], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        rows.iter()
            .map(|d| serde_json::from_str(d).map_err(FinError::from))
            .collect()
    }

    /// Replace collections with server snapshots, then re-apply `rebased`
    /// (the effects of operations still queued) in the same transaction.
    pub fn replace_collections(
        &self,
        snapshots: &[(Collection, Vec<Value>)],
        rebased: &[Effect],
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction().map_err(storage_err)?;
        let mut written = 0;
        for (collection, rows) in snapshots {
            tx.execute(
                "DELETE FROM entities WHERE collection = ?1",
                [collection.table()],
            )
            .map_err(storage_err)?;
            for row in rows {
                match row.get("id").and_then(id_of) {
                    Some(id) => {
                        put_row(&tx, *collection, &id, row)?;
                        written += 1;
                    }
                    None => tracing::warn!("Skipping {} row without id", collection.table()),
                }
            }
        }
        self.write_effects(&tx, rebased)?;
        tx.commit().map_err(storage_err)?;

        tracing::debug!(
            "Replaced {} collection(s) with {} server rows, {} queued effects re-applied",
            snapshots.len(),
            written,
            rebased.len()
        );
        Ok(written)
    }

    /// Rename `temp_id` to `real_id` in every row and reference.
    pub fn remap_id(&self, temp_id: &str, real_id: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction().map_err(storage_err)?;
        let candidates: Vec<(String, String, String)> = {
            let mut stmt = tx
                .prepare("SELECT collection, id, data FROM entities WHERE data LIKE ?1")
                .map_err(storage_err)?;
            let pattern = format!("%{}%", temp_id);
            let rows = stmt
                .query_map([pattern], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .map_err(storage_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_err)?;
            rows
        };

        for (collection, id, data) in candidates {
            let mut value: Value = serde_json::from_str(&data)?;
            if let Value::Object(map) = &mut value {
                for field in REFERENCE_FIELDS {
                    if map.get(field).and_then(Value::as_str) == Some(temp_id) {
                        map.insert(field.to_string(), Value::String(real_id.to_string()));
                    }
                }
            }
            let new_id = if id == temp_id { real_id.to_string() } else { id.clone() };
            tx.execute(
                "DELETE FROM entities WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .map_err(storage_err)?;
            tx.execute(
                "INSERT OR REPLACE INTO entities (collection, id, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![collection, new_id, value.to_string(), now_ts()],
            )
            .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    /// Persist optimistic effects in a single transaction.
    pub fn apply_effects(&self, effects: &[Effect]) -> Result<()> {
        if effects.is_empty() {
            return Ok(());
        }
        let tx = self.conn.unchecked_transaction().map_err(storage_err)?;
        self.write_effects(&tx, effects)?;
        tx.commit().map_err(storage_err)
    }

    fn write_effects(&self, conn: &Connection, effects: &[Effect]) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::AdjustBalance { account_id, delta } => {
                    if let Some(mut account) = self.get_typed::<Account>(Collection::Accounts, account_id)? {
                        account.balance += delta;
                        put_row(conn, Collection::Accounts, account_id, &serde_json::to_value(&account)?)?;
                    }
                }
                Effect::UpsertTransaction(row) => {
                    put_row(conn, Collection::Transactions, &row.id, &serde_json::to_value(row)?)?
                }
                Effect::RemoveTransaction { id } => delete_row(conn, Collection::Transactions, id)?,
                Effect::UpsertAccount(row) => {
                    put_row(conn, Collection::Accounts, &row.id, &serde_json::to_value(row)?)?
                }
                Effect::RemoveAccount { id } => delete_row(conn, Collection::Accounts, id)?,
                Effect::UpsertCategory(row) => {
                    put_row(conn, Collection::Categories, &row.id, &serde_json::to_value(row)?)?
                }
                Effect::RemoveCategory { id } => delete_row(conn, Collection::Categories, id)?,
                Effect::UpsertFixed(row) => {
                    put_row(conn, Collection::FixedTransactions, &row.id, &serde_json::to_value(row)?)?
                }
                Effect::ClearData => {
                    conn.execute("DELETE FROM entities", []).map_err(storage_err)?;
                }
            }
        }
        Ok(())
    }

    pub fn record_mapping(&self, temp_id: &str, real_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO id_map (temp_id, real_id, mapped_at) VALUES (?1, ?2, ?3)",
                params![temp_id, real_id, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn id_map(&self) -> Result<IdMap> {
        let mut stmt = self
            .conn
            .prepare("SELECT temp_id, real_id FROM id_map")
            .map_err(storage_err)?;
        let map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(storage_err)?
            .collect::<std::result::Result<IdMap, _>>()
            .map_err(storage_err)?;
        Ok(map)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .map_err(storage_err)
    }

}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn put_row(conn: &Connection, collection: Collection, id: &str, data: &Value) -> Result<()> {
    conn.execute(
        "INSERT INTO entities (collection, id, data, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(collection, id) DO UPDATE SET
            data = excluded.data,
            updated_at = excluded.updated_at",
        params![collection.table(), id, data.to_string(), now_ts()],
    )
    .map_err(storage_err)?;
    Ok(())
}

fn delete_row(conn: &Connection, collection: Collection, id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM entities WHERE collection = ?1 AND id = ?2",
        params![collection.table(), id],
    )
    .map_err(storage_err)?;
    Ok(())
}
