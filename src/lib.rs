//! Paperflow: a resumable batch pipeline for paper metadata
//!
//! This crate fans a list of work items out across a bounded pool of async
//! workers, retries flaky remote calls with jittered exponential backoff,
//! checkpoints progress to SQLite so an interrupted run can pick up where it
//! stopped, and writes the results back in input order.

pub mod config;
pub mod input;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Paperflow operations
#[derive(Debug, Error)]
pub enum PaperflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Input(#[from] input::InputError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("State error: {0}")]
    State(#[from] state::StateError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::RunPhase,
        to: state::RunPhase,
    },

    #[error("Result table has no entry for index {index} of {total}")]
    MissingResult { index: usize, total: usize },

    #[error("Worker pool failed: {0}")]
    WorkerPool(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Missing [{section}] section required by job kind '{kind}'")]
    MissingSection { section: String, kind: String },

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
}

/// Result type alias for Paperflow operations
pub type Result<T> = std::result::Result<T, PaperflowError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::{Job, Pipeline, PipelineOptions, RunOutcome};
pub use state::{ItemResult, ProcessingState, RunPhase};
pub use storage::{CheckpointStore, SqliteCheckpointStore};
