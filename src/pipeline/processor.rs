//! Single-item processing: retried remote call plus response validation

use crate::pipeline::job::{Job, RemoteError};
use crate::pipeline::retry::{retry_with_backoff, sleep_or_cancel, BackoffPolicy, RetryError};
use crate::pipeline::validator::ValidationError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why an item produced no parsed output
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("{0}")]
    Remote(RetryError<RemoteError>),

    #[error("response rejected after {attempts} attempts: {last}")]
    Validation { attempts: u32, last: ValidationError },

    #[error("cancelled")]
    Cancelled,
}

/// Runs one item through the job
///
/// Each validation attempt issues a fresh remote call under the `retry`
/// policy. A response that fails to parse is re-requested, sleeping per the
/// `validation` policy, until `validation.max_attempts` responses have been
/// rejected.
pub async fn process_item<J: Job>(
    job: &J,
    item: &J::Item,
    retry: &BackoffPolicy,
    validation: &BackoffPolicy,
    cancel: &CancellationToken,
) -> Result<J::Output, ItemError> {
    let max_attempts = validation.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let raw = match retry_with_backoff(retry, cancel, |_| job.call(item)).await {
            Ok(raw) => raw,
            Err(RetryError::Cancelled) => return Err(ItemError::Cancelled),
            Err(e) => return Err(ItemError::Remote(e)),
        };

        let error = match job.parse(item, &raw) {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            return Err(ItemError::Validation {
                attempts: attempt,
                last: error,
            });
        }

        tracing::debug!(attempt, "Response rejected, requesting again: {}", error);

        if !sleep_or_cancel(validation.delay_for_attempt(attempt), cancel).await {
            return Err(ItemError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::validator::parse_structured;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Answer {
        value: u32,
    }

    /// Replays a fixed script of responses, then repeats the last one
    struct ScriptedJob {
        script: Mutex<VecDeque<Result<String, RemoteError>>>,
        calls: AtomicU32,
    }

    impl ScriptedJob {
        fn new(script: Vec<Result<&str, RemoteError>>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Job for ScriptedJob {
        type Item = u32;
        type Output = Answer;

        fn name(&self) -> &str {
            "scripted"
        }

        async fn call(&self, _item: &u32) -> Result<String, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }

        fn parse(&self, _item: &u32, raw: &str) -> Result<Answer, ValidationError> {
            parse_structured(raw)
        }

        fn fallback(&self, _item: &u32) -> Answer {
            Answer { value: 0 }
        }
    }

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_retries_remote_then_parses() {
        let job = ScriptedJob::new(vec![
            Err(RemoteError::Timeout),
            Err(RemoteError::Server { status: 502 }),
            Ok(r#"{"value": 42}"#),
        ]);
        let cancel = CancellationToken::new();

        let answer = process_item(&job, &1, &policy(5), &policy(3), &cancel)
            .await
            .unwrap();

        assert_eq!(answer, Answer { value: 42 });
        assert_eq!(job.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_malformed_response_is_requested_again() {
        let job = ScriptedJob::new(vec![Ok("no json here"), Ok(r#"{"value": 7}"#)]);
        let cancel = CancellationToken::new();

        let answer = process_item(&job, &1, &policy(5), &policy(3), &cancel)
            .await
            .unwrap();

        assert_eq!(answer.value, 7);
        assert_eq!(job.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validation_budget_exhausted() {
        let job = ScriptedJob::new(vec![Ok(r#"{"value": "seven"}"#)]);
        let cancel = CancellationToken::new();

        let result = process_item(&job, &1, &policy(5), &policy(3), &cancel).await;

        assert!(matches!(
            result,
            Err(ItemError::Validation {
                attempts: 3,
                last: ValidationError::SchemaMismatch(_)
            })
        ));
        assert_eq!(job.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_remote_exhaustion_is_reported() {
        let job = ScriptedJob::new(vec![Err(RemoteError::RateLimited { retry_after: None })]);
        let cancel = CancellationToken::new();

        let result = process_item(&job, &1, &policy(4), &policy(2), &cancel).await;

        assert!(matches!(
            result,
            Err(ItemError::Remote(RetryError::Exhausted { attempts: 4, .. }))
        ));
        assert_eq!(job.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let job = ScriptedJob::new(vec![Ok(r#"{"value": 1}"#)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = process_item(&job, &1, &policy(4), &policy(2), &cancel).await;

        assert!(matches!(result, Err(ItemError::Cancelled)));
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
    }
}
