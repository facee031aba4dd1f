//! Storage traits and error types
//!
//! This module defines the trait interface for checkpoint backends and
//! associated error types.

use crate::state::ProcessingState;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Checkpoint is inconsistent: {0}")]
    Inconsistent(String),

    #[error("Unsupported checkpoint format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Unknown result status '{status}' for index {index}")]
    UnknownStatus { index: usize, status: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable snapshot of a run's result table
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint<T> {
    /// Name of the job that produced the results
    pub job: String,

    /// Fingerprint of the item source the results belong to
    pub fingerprint: String,

    /// Number of saves made for this run, including this one
    pub save_counter: u64,

    /// Time of this save
    pub saved_at: DateTime<Utc>,

    /// Completed indices and their results
    pub state: ProcessingState<T>,
}

/// Header of a persisted checkpoint, readable without knowing the payload type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMeta {
    pub job: String,
    pub fingerprint: String,
    pub total_items: usize,
    pub completed: usize,
    pub save_counter: u64,
    pub saved_at: String,
}

/// Trait for checkpoint backend implementations
///
/// A `save` is atomic from the point of view of `load`: a reader sees either
/// the previous checkpoint or the new one, never a mix.
pub trait CheckpointStore {
    /// Reads the most recent checkpoint
    ///
    /// Returns `Ok(None)` when no checkpoint has ever been saved (or it was
    /// cleared). An empty result table is still `Some`.
    fn load<T: DeserializeOwned>(&self) -> StorageResult<Option<Checkpoint<T>>>;

    /// Reads only the checkpoint header
    fn load_meta(&self) -> StorageResult<Option<CheckpointMeta>>;

    /// Replaces the persisted checkpoint with `checkpoint`
    fn save<T: Serialize>(&mut self, checkpoint: &Checkpoint<T>) -> StorageResult<()>;

    /// Removes the checkpoint so a later run starts from scratch
    fn clear(&mut self) -> StorageResult<()>;
}
