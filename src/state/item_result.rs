use serde::{Deserialize, Serialize};

/// Terminal outcome for one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemResult<T> {
    /// The item produced a payload (possibly the job's fallback value)
    Success { payload: T },

    /// The remote call could not be completed
    Failure { reason: String },
}

impl<T> ItemResult<T> {
    pub fn success(payload: T) -> Self {
        Self::Success { payload }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the payload of a successful result
    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::Success { payload } => Some(payload),
            Self::Failure { .. } => None,
        }
    }

    /// Returns the reason of a failed result
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason } => Some(reason),
        }
    }

    /// Status string as persisted in the checkpoint
    pub fn status_str(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
        }
    }
}
