//! Run statistics and checkpoint status reporting
//!
//! This module provides the end-of-run summary and the progress report
//! printed for an existing checkpoint.

use crate::storage::{CheckpointStore, StorageResult};
use std::time::Duration;

/// Counters for one pipeline run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Job name
    pub job: String,

    /// Items in scope for the run (after test-mode sampling)
    pub total: usize,

    /// Items that already had a result in the loaded checkpoint
    pub resumed: usize,

    /// Items that reached a terminal result during this run
    pub processed_this_run: usize,

    /// Successful results, fallbacks included
    pub successes: usize,

    /// Failed results
    pub failures: usize,

    /// Items recorded with the job's fallback value during this run
    pub fallbacks: usize,

    /// Checkpoint saves made during this run
    pub checkpoints_saved: u64,

    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl RunSummary {
    /// Items with a result, from this run or a previous one
    pub fn completed(&self) -> usize {
        self.successes + self.failures
    }

    /// Items still waiting for a result
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed())
    }

    /// Items per second processed during this run
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed_this_run as f64 / secs
        } else {
            0.0
        }
    }
}

/// Prints a run summary to stdout
///
/// # Arguments
///
/// * `summary` - The summary to display
/// * `interrupted` - Whether the run stopped before finishing
pub fn print_summary(summary: &RunSummary, interrupted: bool) {
    if interrupted {
        println!("=== Run Interrupted ===\n");
    } else {
        println!("=== Run Complete ===\n");
    }

    println!("Job: {}", summary.job);
    println!("  Items in scope: {}", summary.total);
    println!("  Resumed from checkpoint: {}", summary.resumed);
    println!("  Processed this run: {}", summary.processed_this_run);
    println!();

    println!("Results:");
    println!("  Successes: {}", summary.successes);
    println!("  Failures: {}", summary.failures);
    if summary.fallbacks > 0 {
        println!("  Fallback values used: {}", summary.fallbacks);
    }
    if interrupted {
        println!("  Remaining: {}", summary.remaining());
    }
    println!();

    println!(
        "Elapsed: {:.1}s ({:.2} items/sec), {} checkpoint saves",
        summary.elapsed.as_secs_f64(),
        summary.rate(),
        summary.checkpoints_saved
    );

    if interrupted {
        println!("\nRun the same command again to resume.");
    }
}

/// Progress recorded in an existing checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointStatus {
    pub job: String,
    pub fingerprint: String,
    pub total: usize,
    pub completed: usize,
    pub save_counter: u64,
    pub saved_at: String,
}

impl CheckpointStatus {
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }
}

/// Reads the checkpoint header from `store`
///
/// Returns `Ok(None)` when there is no checkpoint.
pub fn checkpoint_status<S: CheckpointStore>(store: &S) -> StorageResult<Option<CheckpointStatus>> {
    Ok(store.load_meta()?.map(|meta| CheckpointStatus {
        job: meta.job,
        fingerprint: meta.fingerprint,
        total: meta.total_items,
        completed: meta.completed,
        save_counter: meta.save_counter,
        saved_at: meta.saved_at,
    }))
}

/// Prints checkpoint progress to stdout
pub fn print_checkpoint_status(status: Option<&CheckpointStatus>) {
    let Some(status) = status else {
        println!("No checkpoint found; the next run starts from the beginning.");
        return;
    };

    println!("=== Checkpoint Status ===\n");
    println!("  Job: {}", status.job);
    println!(
        "  Progress: {}/{} ({:.1}%)",
        status.completed,
        status.total,
        status.percent_complete()
    );
    println!("  Saves: {}", status.save_counter);
    println!("  Last saved: {}", status.saved_at);
    println!("  Input fingerprint: {}", status.fingerprint);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ItemResult, ProcessingState};
    use crate::storage::{Checkpoint, SqliteCheckpointStore};
    use chrono::Utc;

    #[test]
    fn test_summary_counters() {
        let summary = RunSummary {
            job: "classify".to_string(),
            total: 10,
            resumed: 4,
            processed_this_run: 3,
            successes: 6,
            failures: 1,
            fallbacks: 1,
            checkpoints_saved: 2,
            elapsed: Duration::from_secs(3),
        };

        assert_eq!(summary.completed(), 7);
        assert_eq!(summary.remaining(), 3);
        assert!((summary.rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_checkpoint_status_absent() {
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        assert!(checkpoint_status(&store).unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_status_reports_progress() {
        let mut store = SqliteCheckpointStore::new_in_memory().unwrap();
        let mut state = ProcessingState::new(8);
        state.merge(0, ItemResult::success(true)).unwrap();
        state.merge(5, ItemResult::<bool>::failure("timeout")).unwrap();

        store
            .save(&Checkpoint {
                job: "scrape".to_string(),
                fingerprint: "f00d".to_string(),
                save_counter: 4,
                saved_at: Utc::now(),
                state,
            })
            .unwrap();

        let status = checkpoint_status(&store).unwrap().unwrap();
        assert_eq!(status.job, "scrape");
        assert_eq!(status.completed, 2);
        assert_eq!(status.total, 8);
        assert_eq!(status.save_counter, 4);
        assert!((status.percent_complete() - 25.0).abs() < 1e-9);
    }
}
