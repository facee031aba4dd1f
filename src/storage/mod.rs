//! Storage module for persisting checkpoints
//!
//! This module handles all database operations for resumable runs:
//! - SQLite checkpoint database initialization
//! - Atomic replacement of the completed-index set and result table
//! - Loading the previous checkpoint on startup
//! - Removing the checkpoint once the run finishes

mod schema;
mod sqlite;
mod traits;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteCheckpointStore;
pub use traits::{Checkpoint, CheckpointMeta, CheckpointStore, StorageError, StorageResult};
