//! Output module for run results and summaries
//!
//! This module handles:
//! - Writing the final ordered result table
//! - Summarizing a run
//! - Reporting the progress stored in a checkpoint

pub mod stats;
mod writer;

pub use stats::{
    checkpoint_status, print_checkpoint_status, print_summary, CheckpointStatus, RunSummary,
};
pub use writer::{write_output, OutputError, OutputRecord};
