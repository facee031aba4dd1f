//! SQLite checkpoint implementation
//!
//! This module provides a SQLite-based implementation of the CheckpointStore trait.

use crate::state::{ItemResult, ProcessingState};
use crate::storage::schema::{initialize_schema, SCHEMA_VERSION};
use crate::storage::traits::{
    Checkpoint, CheckpointMeta, CheckpointStore, StorageError, StorageResult,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// SQLite checkpoint backend
pub struct SqliteCheckpointStore {
    /// `None` for in-memory stores
    path: Option<PathBuf>,

    /// Closed after `clear` until the next `save`
    conn: Option<Connection>,
}

impl SqliteCheckpointStore {
    /// Opens (or creates) the checkpoint database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = open_connection(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Some(conn),
        })
    }

    /// Creates an in-memory store
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Some(conn),
        })
    }

    /// Path of the backing database, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connection(&mut self) -> StorageResult<&mut Connection> {
        if self.conn.is_none() {
            let conn = match &self.path {
                Some(path) => open_connection(path)?,
                None => {
                    let conn = Connection::open_in_memory()?;
                    initialize_schema(&conn)?;
                    conn
                }
            };
            self.conn = Some(conn);
        }

        // Populated just above
        self.conn
            .as_mut()
            .ok_or_else(|| StorageError::Inconsistent("connection unavailable".to_string()))
    }
}

fn open_connection(path: &Path) -> StorageResult<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = FULL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}

fn read_meta(conn: &Connection) -> StorageResult<Option<(u32, CheckpointMeta)>> {
    let meta = conn
        .query_row(
            "SELECT format_version, job, fingerprint, total_items, save_counter, saved_at
             FROM checkpoint_meta WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    CheckpointMeta {
                        job: row.get(1)?,
                        fingerprint: row.get(2)?,
                        total_items: row.get::<_, i64>(3)? as usize,
                        completed: 0,
                        save_counter: row.get::<_, i64>(4)? as u64,
                        saved_at: row.get(5)?,
                    },
                ))
            },
        )
        .optional()?;

    let Some((version, mut meta)) = meta else {
        return Ok(None);
    };

    let completed: i64 =
        conn.query_row("SELECT COUNT(*) FROM completed_indices", [], |row| row.get(0))?;
    meta.completed = completed as usize;

    Ok(Some((version, meta)))
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load<T: DeserializeOwned>(&self) -> StorageResult<Option<Checkpoint<T>>> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(None);
        };

        let Some((version, meta)) = read_meta(conn)? else {
            return Ok(None);
        };

        if version != SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        let completed: BTreeSet<usize> = conn
            .prepare("SELECT item_index FROM completed_indices")?
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|index| index.map(|i| i as usize))
            .collect::<Result<_, _>>()?;

        let mut stmt =
            conn.prepare("SELECT item_index, status, payload, reason FROM item_results")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)? as usize,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut results = BTreeMap::new();
        for row in rows {
            let (index, status, payload, reason) = row?;
            let result = match status.as_str() {
                "success" => {
                    let raw = payload.ok_or_else(|| {
                        StorageError::Inconsistent(format!("index {} has no payload", index))
                    })?;
                    let payload: T = serde_json::from_str(&raw)
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    ItemResult::success(payload)
                }
                "failure" => ItemResult::failure(reason.unwrap_or_default()),
                _ => return Err(StorageError::UnknownStatus { index, status }),
            };
            results.insert(index, result);
        }

        if !results.keys().copied().eq(completed.iter().copied()) {
            return Err(StorageError::Inconsistent(format!(
                "{} completed indices but {} results",
                completed.len(),
                results.len()
            )));
        }

        let state = ProcessingState::from_results(meta.total_items, results)
            .map_err(|e| StorageError::Inconsistent(e.to_string()))?;

        let saved_at = meta
            .saved_at
            .parse::<DateTime<Utc>>()
            .map_err(|e| StorageError::Serialization(format!("saved_at: {}", e)))?;

        Ok(Some(Checkpoint {
            job: meta.job,
            fingerprint: meta.fingerprint,
            save_counter: meta.save_counter,
            saved_at,
            state,
        }))
    }

    fn load_meta(&self) -> StorageResult<Option<CheckpointMeta>> {
        match self.conn.as_ref() {
            Some(conn) => Ok(read_meta(conn)?.map(|(_, meta)| meta)),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&mut self, checkpoint: &Checkpoint<T>) -> StorageResult<()> {
        // Serialize before opening the transaction so a bad payload leaves
        // the previous checkpoint untouched
        let mut rows = Vec::with_capacity(checkpoint.state.completed());
        for (index, result) in checkpoint.state.iter() {
            let (payload, reason) = match result {
                ItemResult::Success { payload } => (
                    Some(
                        serde_json::to_string(payload)
                            .map_err(|e| StorageError::Serialization(e.to_string()))?,
                    ),
                    None,
                ),
                ItemResult::Failure { reason } => (None, Some(reason.clone())),
            };
            rows.push((index as i64, result.status_str(), payload, reason));
        }

        let conn = self.connection()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM completed_indices", [])?;
        tx.execute("DELETE FROM item_results", [])?;

        {
            let mut insert_index =
                tx.prepare("INSERT INTO completed_indices (item_index) VALUES (?1)")?;
            let mut insert_result = tx.prepare(
                "INSERT INTO item_results (item_index, status, payload, reason)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;

            for (index, status, payload, reason) in &rows {
                insert_index.execute(params![index])?;
                insert_result.execute(params![index, status, payload, reason])?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO checkpoint_meta
             (id, format_version, job, fingerprint, total_items, save_counter, saved_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                SCHEMA_VERSION,
                checkpoint.job,
                checkpoint.fingerprint,
                checkpoint.state.total() as i64,
                checkpoint.save_counter as i64,
                checkpoint.saved_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;

        tracing::debug!(
            completed = rows.len(),
            save_counter = checkpoint.save_counter,
            "Checkpoint written"
        );

        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        match self.path.clone() {
            Some(path) => {
                // Close before unlinking so the WAL is not recreated
                if let Some(conn) = self.conn.take() {
                    conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
                }

                for candidate in sidecar_paths(&path) {
                    match std::fs::remove_file(&candidate) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            None => {
                let conn = self.connection()?;
                conn.execute_batch(
                    "DELETE FROM completed_indices;
                     DELETE FROM item_results;
                     DELETE FROM checkpoint_meta;",
                )?;
            }
        }

        Ok(())
    }
}

/// The database file plus the WAL-mode companions SQLite may leave behind
fn sidecar_paths(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        paths.push(PathBuf::from(name));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Verdict {
        relevant: bool,
    }

    fn checkpoint(total: usize, done: &[usize], counter: u64) -> Checkpoint<Verdict> {
        let mut state = ProcessingState::new(total);
        for &index in done {
            let result = if index % 2 == 0 {
                ItemResult::success(Verdict { relevant: true })
            } else {
                ItemResult::failure("rate limited")
            };
            state.merge(index, result).unwrap();
        }
        Checkpoint {
            job: "classify".to_string(),
            fingerprint: "abc123".to_string(),
            save_counter: counter,
            saved_at: Utc::now(),
            state,
        }
    }

    #[test]
    fn test_load_without_checkpoint_is_none() {
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let loaded: Option<Checkpoint<Verdict>> = store.load().unwrap();
        assert!(loaded.is_none());
        assert!(store.load_meta().unwrap().is_none());
    }

    #[test]
    fn test_empty_checkpoint_is_distinct_from_none() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        store.save(&checkpoint(5, &[], 1)).unwrap();

        let loaded: Checkpoint<Verdict> = store.load().unwrap().unwrap();
        assert_eq!(loaded.state.completed(), 0);
        assert_eq!(loaded.state.total(), 5);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        let original = checkpoint(10, &[0, 1, 4, 7], 3);
        store.save(&original).unwrap();

        let loaded: Checkpoint<Verdict> = store.load().unwrap().unwrap();
        assert_eq!(loaded.job, "classify");
        assert_eq!(loaded.fingerprint, "abc123");
        assert_eq!(loaded.save_counter, 3);
        assert_eq!(loaded.state, original.state);
    }

    #[test]
    fn test_save_replaces_previous_checkpoint() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        store.save(&checkpoint(10, &[0, 1, 2], 1)).unwrap();
        store.save(&checkpoint(10, &[0, 1, 2, 3, 4, 5], 2)).unwrap();

        let meta = store.load_meta().unwrap().unwrap();
        assert_eq!(meta.completed, 6);
        assert_eq!(meta.save_counter, 2);
        assert_eq!(meta.total_items, 10);
    }

    #[test]
    fn test_completed_count_matches_result_table() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        store.save(&checkpoint(20, &[3, 5, 8, 13], 1)).unwrap();

        let conn = store.conn.as_ref().unwrap();
        let indices: i64 = conn
            .query_row("SELECT COUNT(*) FROM completed_indices", [], |r| r.get(0))
            .unwrap();
        let results: i64 = conn
            .query_row("SELECT COUNT(*) FROM item_results", [], |r| r.get(0))
            .unwrap();
        assert_eq!(indices, 4);
        assert_eq!(results, 4);
    }

    #[test]
    fn test_load_rejects_dangling_index() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        store.save(&checkpoint(5, &[0, 1], 1)).unwrap();

        store
            .conn
            .as_ref()
            .unwrap()
            .execute("INSERT INTO completed_indices (item_index) VALUES (4)", [])
            .unwrap();

        let result: StorageResult<Option<Checkpoint<Verdict>>> = store.load();
        assert!(matches!(result, Err(StorageError::Inconsistent(_))));
    }

    #[test]
    fn test_clear_removes_database_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.checkpoint.db");

        let mut store = SqliteCheckpointStore::open(&path).unwrap();
        store.save(&checkpoint(4, &[0, 2], 1)).unwrap();
        assert!(path.exists());

        store.clear().unwrap();
        assert!(!path.exists());
        let loaded: Option<Checkpoint<Verdict>> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_reopen_sees_saved_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.checkpoint.db");

        {
            let mut store = SqliteCheckpointStore::open(&path).unwrap();
            store.save(&checkpoint(6, &[0, 1, 2], 1)).unwrap();
        }

        let store = SqliteCheckpointStore::open(&path).unwrap();
        let loaded: Checkpoint<Verdict> = store.load().unwrap().unwrap();
        assert_eq!(loaded.state.completed_indices(), vec![0, 1, 2]);
    }
}
