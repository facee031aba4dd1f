//! Pipeline orchestrator - main run logic
//!
//! This module drives one run from start to finish:
//! - Loading (or discarding) the previous checkpoint
//! - Dispatching the remaining indices to the worker pool
//! - Merging results and saving checkpoints on a fixed cadence
//! - Handling cancellation and fatal storage errors
//! - Writing the ordered output and removing the checkpoint
//!
//! The orchestrator is the only writer of the result table. Workers hand
//! their results back over the pool's channel.

use crate::config::{Config, OutputFormat};
use crate::input::fingerprint_items;
use crate::output::{write_output, OutputRecord, RunSummary};
use crate::pipeline::job::Job;
use crate::pipeline::processor::{process_item, ItemError};
use crate::pipeline::retry::BackoffPolicy;
use crate::pipeline::worker_pool::{PoolHandle, TaskPanic, WorkerPool};
use crate::state::{ItemResult, ProcessingState, RunPhase};
use crate::storage::{Checkpoint, CheckpointStore, StorageResult};
use crate::{PaperflowError, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tunables for a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Maximum in-flight items
    pub max_concurrency: usize,

    /// Completed items between checkpoint saves
    pub checkpoint_every: usize,

    /// Backoff for remote calls
    pub retry: BackoffPolicy,

    /// Budget and backoff for re-requesting unparseable responses
    pub validation: BackoffPolicy,

    /// Process only this many items from the start of the input
    pub test_mode_sample_size: Option<usize>,

    /// Destination of the final result file
    pub output_path: PathBuf,

    pub output_format: OutputFormat,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.pipeline.max_concurrency,
            checkpoint_every: config.pipeline.checkpoint_every,
            retry: BackoffPolicy::from(&config.retry),
            validation: BackoffPolicy::from(&config.validation),
            test_mode_sample_size: config.pipeline.test_mode_sample_size,
            output_path: PathBuf::from(&config.output.output_path),
            output_format: config.output.format,
        }
    }
}

/// How a run ended without error
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// Every item has a result; the output is written and the checkpoint removed
    Completed {
        summary: RunSummary,
        results: Vec<ItemResult<T>>,
    },

    /// Cancelled; progress is saved in the checkpoint
    Interrupted { summary: RunSummary },
}

impl<T> RunOutcome<T> {
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Completed { summary, .. } | Self::Interrupted { summary } => summary,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Mutable bookkeeping for the current run
struct RunProgress<T> {
    state: ProcessingState<T>,
    fingerprint: String,
    save_counter: u64,
    saves: u64,
    since_save: usize,
    resumed: usize,
    processed: usize,
    fallbacks: usize,
}

impl<T> RunProgress<T> {
    fn new(state: ProcessingState<T>, fingerprint: String, save_counter: u64) -> Self {
        let resumed = state.completed();
        Self {
            state,
            fingerprint,
            save_counter,
            saves: 0,
            since_save: 0,
            resumed,
            processed: 0,
            fallbacks: 0,
        }
    }
}

/// Resumable batch pipeline over one job and one checkpoint store
pub struct Pipeline<J: Job, S: CheckpointStore> {
    job: Arc<J>,
    store: S,
    options: PipelineOptions,
    phase: RunPhase,
}

impl<J: Job, S: CheckpointStore> Pipeline<J, S> {
    pub fn new(job: J, store: S, options: PipelineOptions) -> Self {
        Self {
            job: Arc::new(job),
            store,
            options,
            phase: RunPhase::Init,
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Runs the pipeline over `items`
    ///
    /// A pipeline runs once; calling `run` again fails with
    /// [`PaperflowError::InvalidTransition`].
    ///
    /// # Returns
    ///
    /// * `Ok(RunOutcome::Completed)` - All items processed, output written
    /// * `Ok(RunOutcome::Interrupted)` - `cancel` fired, progress checkpointed
    /// * `Err(PaperflowError)` - Fatal storage, output or pool error
    pub async fn run(
        &mut self,
        mut items: Vec<J::Item>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome<J::Output>> {
        let started = Instant::now();
        self.transition(RunPhase::LoadingCheckpoint)?;

        if let Some(sample) = self.options.test_mode_sample_size {
            if sample < items.len() {
                tracing::info!(
                    "Test mode: processing the first {} of {} items",
                    sample,
                    items.len()
                );
                items.truncate(sample);
            }
        }

        let fingerprint = fingerprint_items(&items)?;
        let mut progress = self.load_progress(items.len(), fingerprint)?;
        let remaining = progress.state.remaining();

        if remaining.is_empty() {
            tracing::info!("All {} items already have results", items.len());
        } else {
            self.transition(RunPhase::Dispatching)?;
            tracing::info!(
                completed = progress.state.completed(),
                remaining = remaining.len(),
                "Dispatching {} items to {} workers",
                remaining.len(),
                self.options.max_concurrency
            );

            let items = Arc::new(items);
            if let Some(outcome) = self
                .dispatch(remaining, &items, &mut progress, &cancel, started)
                .await?
            {
                return Ok(outcome);
            }
        }

        self.transition(RunPhase::Finalizing)?;
        self.finalize(progress, started)
    }

    fn transition(&mut self, to: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(PaperflowError::InvalidTransition {
                from: self.phase,
                to,
            });
        }

        tracing::debug!("Phase {} -> {}", self.phase, to);
        self.phase = to;
        Ok(())
    }

    /// Reads the checkpoint, discarding it when it belongs to other input
    fn load_progress(
        &mut self,
        total: usize,
        fingerprint: String,
    ) -> Result<RunProgress<J::Output>> {
        let Some(meta) = self.store.load_meta()? else {
            tracing::info!("No checkpoint found, starting from the beginning");
            return Ok(RunProgress::new(ProcessingState::new(total), fingerprint, 0));
        };

        if meta.job != self.job.name() || meta.fingerprint != fingerprint || meta.total_items != total
        {
            tracing::warn!(
                "Discarding checkpoint for job '{}' ({} items): it does not match the current input",
                meta.job,
                meta.total_items
            );
            return Ok(RunProgress::new(ProcessingState::new(total), fingerprint, 0));
        }

        let Some(checkpoint) = self.store.load::<J::Output>()? else {
            return Ok(RunProgress::new(ProcessingState::new(total), fingerprint, 0));
        };

        tracing::info!(
            "Resuming from checkpoint: {}/{} items complete (save #{}, {})",
            checkpoint.state.completed(),
            total,
            checkpoint.save_counter,
            checkpoint.saved_at.to_rfc3339()
        );

        Ok(RunProgress::new(
            checkpoint.state,
            fingerprint,
            checkpoint.save_counter,
        ))
    }

    /// Drives the worker pool until every index has a result or the run stops
    ///
    /// Returns `Ok(None)` when the result table is complete.
    async fn dispatch(
        &mut self,
        remaining: Vec<usize>,
        items: &Arc<Vec<J::Item>>,
        progress: &mut RunProgress<J::Output>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<Option<RunOutcome<J::Output>>> {
        let workers = cancel.child_token();
        let pool = WorkerPool::new(self.options.max_concurrency);

        let job = Arc::clone(&self.job);
        let task_items = Arc::clone(items);
        let retry = self.options.retry;
        let validation = self.options.validation;
        let token = workers.clone();

        let PoolHandle {
            mut results,
            dispatcher,
        } = pool.spawn(remaining, workers.clone(), move |index| {
            let job = Arc::clone(&job);
            let items = Arc::clone(&task_items);
            let token = token.clone();
            async move { process_item(job.as_ref(), &items[index], &retry, &validation, &token).await }
        });

        while let Some((index, outcome)) = results.recv().await {
            let (result, fallback) = match outcome {
                Ok(Ok(output)) => (ItemResult::success(output), false),
                Ok(Err(ItemError::Validation { attempts, last })) => {
                    tracing::warn!(
                        index,
                        attempts,
                        "No valid response, using fallback value: {}",
                        last
                    );
                    (ItemResult::success(self.job.fallback(&items[index])), true)
                }
                Ok(Err(ItemError::Remote(e))) => {
                    tracing::warn!(index, "Item failed: {}", e);
                    (ItemResult::failure(e.to_string()), false)
                }
                Ok(Err(ItemError::Cancelled)) => continue,
                Err(panic) => {
                    tracing::warn!(index, "Item failed: {}", panic);
                    (ItemResult::failure(panic.to_string()), false)
                }
            };

            match progress.state.merge(index, result) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(index, "Duplicate result ignored");
                    continue;
                }
                Err(e) => {
                    stop_workers(&workers, results, dispatcher).await;
                    return Err(self.abort(progress, e.into()));
                }
            }

            progress.processed += 1;
            progress.since_save += 1;
            if fallback {
                progress.fallbacks += 1;
            }
            tracing::debug!(index, completed = progress.state.completed(), "Item done");

            if progress.since_save >= self.options.checkpoint_every && !progress.state.is_complete()
            {
                self.transition(RunPhase::Checkpointing)?;
                if let Err(e) = self.save(progress) {
                    stop_workers(&workers, results, dispatcher).await;
                    return Err(self.abort(progress, e.into()));
                }
                self.transition(RunPhase::Dispatching)?;
            }
        }

        let report = match dispatcher.await {
            Ok(report) => report,
            Err(e) => return Err(self.dispatcher_failed(progress, e)),
        };

        if progress.state.is_complete() {
            return Ok(None);
        }

        if cancel.is_cancelled() {
            tracing::info!(
                "Cancellation requested, saving final checkpoint ({} of {} items complete)",
                progress.state.completed(),
                progress.state.total()
            );
            self.transition(RunPhase::Checkpointing)?;
            if let Err(e) = self.save(progress) {
                return Err(self.abort(progress, e.into()));
            }
            self.transition(RunPhase::Interrupted)?;
            return Ok(Some(RunOutcome::Interrupted {
                summary: self.summary(progress, started),
            }));
        }

        let missing = progress.state.total() - progress.state.completed();
        let error = PaperflowError::WorkerPool(format!(
            "{} items produced no result ({} dispatched, {} skipped)",
            missing, report.dispatched, report.skipped
        ));
        Err(self.abort(progress, error))
    }

    /// Writes the ordered output and removes the checkpoint
    fn finalize(
        &mut self,
        mut progress: RunProgress<J::Output>,
        started: Instant,
    ) -> Result<RunOutcome<J::Output>> {
        let total = progress.state.total();
        let mut records = Vec::with_capacity(total);
        for index in 0..total {
            let result = progress
                .state
                .get(index)
                .ok_or(PaperflowError::MissingResult { index, total })?;
            records.push(OutputRecord::from_result(index, result));
        }

        if let Err(e) = write_output(
            &self.options.output_path,
            self.options.output_format,
            &records,
        ) {
            return Err(self.abort(&mut progress, e.into()));
        }
        drop(records);

        if let Err(e) = self.store.clear() {
            return Err(self.abort(&mut progress, e.into()));
        }

        self.transition(RunPhase::Done)?;

        let summary = self.summary(&progress, started);
        tracing::info!(
            "Run complete: {} successes, {} failures, {} fallbacks",
            summary.successes,
            summary.failures,
            summary.fallbacks
        );

        let results = progress.state.into_ordered()?;
        Ok(RunOutcome::Completed { summary, results })
    }

    fn save(&mut self, progress: &mut RunProgress<J::Output>) -> StorageResult<()> {
        let checkpoint = Checkpoint {
            job: self.job.name().to_string(),
            fingerprint: progress.fingerprint.clone(),
            save_counter: progress.save_counter + 1,
            saved_at: Utc::now(),
            state: progress.state.clone(),
        };

        self.store.save(&checkpoint)?;

        progress.save_counter += 1;
        progress.saves += 1;
        progress.since_save = 0;

        tracing::info!(
            completed = progress.state.completed(),
            remaining = progress.state.total() - progress.state.completed(),
            save_counter = progress.save_counter,
            "Checkpoint saved"
        );

        Ok(())
    }

    /// Enters `Aborting`, makes one last save attempt and hands back `error`
    fn abort(
        &mut self,
        progress: &mut RunProgress<J::Output>,
        error: PaperflowError,
    ) -> PaperflowError {
        if let Err(e) = self.transition(RunPhase::Aborting) {
            tracing::error!("{}", e);
        }
        tracing::error!("Aborting run: {}", error);

        match self.save(progress) {
            Ok(()) => tracing::info!(
                "Final checkpoint saved with {} completed items",
                progress.state.completed()
            ),
            Err(e) => tracing::error!("Final checkpoint save failed: {}", e),
        }

        error
    }

    fn dispatcher_failed(
        &mut self,
        progress: &mut RunProgress<J::Output>,
        error: tokio::task::JoinError,
    ) -> PaperflowError {
        let error = PaperflowError::WorkerPool(format!("dispatcher failed: {}", error));
        self.abort(progress, error)
    }

    fn summary(&self, progress: &RunProgress<J::Output>, started: Instant) -> RunSummary {
        RunSummary {
            job: self.job.name().to_string(),
            total: progress.state.total(),
            resumed: progress.resumed,
            processed_this_run: progress.processed,
            successes: progress.state.successes(),
            failures: progress.state.failures(),
            fallbacks: progress.fallbacks,
            checkpoints_saved: progress.saves,
            elapsed: started.elapsed(),
        }
    }
}

/// Cancels in-flight work and waits for the pool to drain
async fn stop_workers<T>(
    workers: &CancellationToken,
    results: tokio::sync::mpsc::Receiver<(usize, std::result::Result<T, TaskPanic>)>,
    dispatcher: tokio::task::JoinHandle<crate::pipeline::worker_pool::PoolReport>,
) {
    workers.cancel();
    drop(results);
    if let Err(e) = dispatcher.await {
        tracing::error!("Worker pool did not shut down cleanly: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::RemoteError;
    use crate::pipeline::validator::{parse_structured, ValidationError};
    use crate::storage::SqliteCheckpointStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Echoes the item back as `{"value": item}`
    struct EchoJob;

    #[async_trait]
    impl Job for EchoJob {
        type Item = u32;
        type Output = u32;

        fn name(&self) -> &str {
            "echo"
        }

        async fn call(&self, item: &u32) -> std::result::Result<String, RemoteError> {
            Ok(format!("{{\"value\": {}}}", item))
        }

        fn parse(&self, _item: &u32, raw: &str) -> std::result::Result<u32, ValidationError> {
            #[derive(serde::Deserialize)]
            struct Echo {
                value: u32,
            }
            parse_structured::<Echo>(raw).map(|e| e.value)
        }

        fn fallback(&self, _item: &u32) -> u32 {
            0
        }
    }

    fn options(dir: &TempDir) -> PipelineOptions {
        let policy = BackoffPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        PipelineOptions {
            max_concurrency: 4,
            checkpoint_every: 3,
            retry: policy,
            validation: policy,
            test_mode_sample_size: None,
            output_path: dir.path().join("out.json"),
            output_format: OutputFormat::Json,
        }
    }

    #[tokio::test]
    async fn test_run_completes_in_order() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let mut pipeline = Pipeline::new(EchoJob, store, options(&dir));

        let outcome = pipeline
            .run((0..10).collect(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(pipeline.phase(), RunPhase::Done);
        let RunOutcome::Completed { summary, results } = outcome else {
            panic!("expected a completed run");
        };
        let values: Vec<u32> = results.iter().map(|r| *r.payload().unwrap()).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        assert_eq!(summary.successes, 10);
        assert_eq!(summary.processed_this_run, 10);
        assert!(summary.checkpoints_saved >= 3);

        assert!(pipeline.store().load_meta().unwrap().is_none());
        assert!(dir.path().join("out.json").exists());
    }

    #[tokio::test]
    async fn test_empty_input_goes_straight_to_done() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let mut pipeline = Pipeline::new(EchoJob, store, options(&dir));

        let outcome = pipeline
            .run(Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(outcome.summary().total, 0);
        assert_eq!(pipeline.phase(), RunPhase::Done);
    }

    #[tokio::test]
    async fn test_pipeline_runs_once() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let mut pipeline = Pipeline::new(EchoJob, store, options(&dir));

        pipeline
            .run(vec![1, 2], CancellationToken::new())
            .await
            .unwrap();
        let second = pipeline.run(vec![1, 2], CancellationToken::new()).await;

        assert!(matches!(
            second,
            Err(PaperflowError::InvalidTransition {
                from: RunPhase::Done,
                to: RunPhase::LoadingCheckpoint
            })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let mut pipeline = Pipeline::new(EchoJob, store, options(&dir));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = pipeline.run((0..5).collect(), cancel).await.unwrap();

        assert!(!outcome.is_completed());
        assert_eq!(pipeline.phase(), RunPhase::Interrupted);
        let meta = pipeline.store().load_meta().unwrap().unwrap();
        assert_eq!(meta.total_items, 5);
        assert_eq!(meta.completed, 0);
        assert!(!dir.path().join("out.json").exists());
    }

    #[tokio::test]
    async fn test_output_failure_aborts_and_keeps_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let mut opts = options(&dir);
        opts.output_path = dir.path().join("missing").join("out.json");
        let mut pipeline = Pipeline::new(EchoJob, store, opts);

        let result = pipeline
            .run((0..4).collect(), CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PaperflowError::Output(_))));
        assert_eq!(pipeline.phase(), RunPhase::Aborting);
        let meta = pipeline.store().load_meta().unwrap().unwrap();
        assert_eq!(meta.completed, 4);
    }

    #[tokio::test]
    async fn test_dispatcher_failure_aborts_with_final_save() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::new_in_memory().unwrap();
        let mut pipeline = Pipeline::new(EchoJob, store, options(&dir));
        pipeline.transition(RunPhase::LoadingCheckpoint).unwrap();
        pipeline.transition(RunPhase::Dispatching).unwrap();

        let mut state = ProcessingState::new(3);
        state.merge(0, ItemResult::success(7)).unwrap();
        let mut progress = RunProgress::new(state, "fp".to_string(), 0);

        let join_error = tokio::spawn(async { panic!("dispatcher blew up") })
            .await
            .unwrap_err();
        let error = pipeline.dispatcher_failed(&mut progress, join_error);

        assert!(matches!(error, PaperflowError::WorkerPool(_)));
        assert_eq!(pipeline.phase(), RunPhase::Aborting);
        let meta = pipeline.store().load_meta().unwrap().unwrap();
        assert_eq!(meta.completed, 1);
        assert_eq!(meta.save_counter, 1);
    }
}
