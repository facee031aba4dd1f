//! Database schema definitions
//!
//! The checkpoint is three tables written together: a single header row,
//! the set of completed indices, and the result for each of those indices.

/// Checkpoint format version, stored in the header row
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the checkpoint database
pub const SCHEMA_SQL: &str = r#"
-- Single header row; its presence marks a valid checkpoint
CREATE TABLE IF NOT EXISTS checkpoint_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    format_version INTEGER NOT NULL,
    job TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    total_items INTEGER NOT NULL,
    save_counter INTEGER NOT NULL,
    saved_at TEXT NOT NULL
);

-- Indices that reached a terminal result
CREATE TABLE IF NOT EXISTS completed_indices (
    item_index INTEGER PRIMARY KEY
);

-- Result table; payload is JSON for successes, reason is set for failures
CREATE TABLE IF NOT EXISTS item_results (
    item_index INTEGER PRIMARY KEY,
    status TEXT NOT NULL,
    payload TEXT,
    reason TEXT
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize_schema(&conn).unwrap();
        let result = initialize_schema(&conn);

        assert!(result.is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["checkpoint_meta", "completed_indices", "item_results"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_meta_allows_single_row() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let insert = "INSERT INTO checkpoint_meta VALUES (?1, 1, 'job', 'fp', 3, 1, 'now')";
        conn.execute(insert, [1]).unwrap();
        assert!(conn.execute(insert, [2]).is_err());
    }
}
