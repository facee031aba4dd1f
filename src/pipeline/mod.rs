//! Batch pipeline engine
//!
//! # Components
//!
//! - `retry`: bounded exponential backoff around one remote call
//! - `validator`: extraction of the JSON object in a raw response
//! - `job`: the per-item capability a pipeline drives
//! - `processor`: one item through retry and validation
//! - `worker_pool`: bounded concurrent execution over a channel
//! - `orchestrator`: checkpointed run lifecycle

pub mod job;
pub mod orchestrator;
pub mod processor;
pub mod retry;
pub mod validator;
pub mod worker_pool;

pub use job::{Job, RemoteError};
pub use orchestrator::{Pipeline, PipelineOptions, RunOutcome};
pub use processor::{process_item, ItemError};
pub use retry::{retry_with_backoff, BackoffPolicy, RetryError, Retryable};
pub use validator::{extract_json_block, parse_structured, parse_validated, Validate, ValidationError};
pub use worker_pool::{PoolHandle, PoolReport, TaskPanic, WorkerPool};
