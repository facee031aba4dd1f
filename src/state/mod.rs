//! State module for tracking run progress
//!
//! # Components
//!
//! - `ItemResult`: terminal outcome of a single work item
//! - `ProcessingState`: index-keyed result table owned by the orchestrator
//! - `RunPhase`: lifecycle of a pipeline run

mod item_result;
mod processing;
mod run_phase;

// Re-export main types
pub use item_result::ItemResult;
pub use processing::{ProcessingState, StateError};
pub use run_phase::RunPhase;
