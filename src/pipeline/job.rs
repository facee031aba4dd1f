//! The per-item capability the pipeline drives

use crate::pipeline::retry::Retryable;
use crate::pipeline::validator::ValidationError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by remote endpoint")]
    RateLimited { retry_after: Option<Duration> },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("request was not authorized")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("remote returned an empty response")]
    EmptyResponse,
}

impl Retryable for RemoteError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited { .. } | Self::Connection(_) | Self::Server { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A unit of remote work applied to every item
///
/// `call` talks to the remote endpoint and returns its raw text, `parse`
/// turns that text into the job's output for the same item, and `fallback`
/// supplies the value recorded for an item whose responses never parse.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    type Item: Serialize + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Stable name, stored in the checkpoint
    fn name(&self) -> &str;

    async fn call(&self, item: &Self::Item) -> Result<String, RemoteError>;

    fn parse(&self, item: &Self::Item, raw: &str) -> Result<Self::Output, ValidationError>;

    fn fallback(&self, item: &Self::Item) -> Self::Output;
}
