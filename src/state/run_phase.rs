//! Lifecycle phases of a pipeline run
//!
//! The orchestrator walks these in order and refuses any transition that
//! `can_transition_to` does not allow.
use std::fmt;

/// Represents the current phase of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Run object created, nothing read yet
    Init,

    /// Reading the previous checkpoint, if any
    LoadingCheckpoint,

    /// Items are being handed to the worker pool and results merged
    Dispatching,

    /// Persisting the current result table
    Checkpointing,

    /// Writing the ordered output and removing the checkpoint
    Finalizing,

    /// Every item has a result and the output is on disk
    Done,

    /// A stop signal arrived; the last checkpoint has been written
    Interrupted,

    /// A storage failure ended the run after a last-chance checkpoint save
    Aborting,
}

impl RunPhase {
    /// Returns true if the run cannot leave this phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Interrupted | Self::Aborting)
    }

    /// Returns true if the orchestrator may move from `self` to `next`
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Init, LoadingCheckpoint)
                | (LoadingCheckpoint, Dispatching)
                | (LoadingCheckpoint, Finalizing)
                | (Dispatching, Checkpointing)
                | (Dispatching, Finalizing)
                | (Dispatching, Interrupted)
                | (Dispatching, Aborting)
                | (Checkpointing, Dispatching)
                | (Checkpointing, Interrupted)
                | (Checkpointing, Aborting)
                | (Finalizing, Done)
                | (Finalizing, Aborting)
        )
    }

    /// Short lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::LoadingCheckpoint => "loading_checkpoint",
            Self::Dispatching => "dispatching",
            Self::Checkpointing => "checkpointing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Interrupted => "interrupted",
            Self::Aborting => "aborting",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RunPhase::Init,
            RunPhase::LoadingCheckpoint,
            RunPhase::Dispatching,
            RunPhase::Checkpointing,
            RunPhase::Dispatching,
            RunPhase::Finalizing,
            RunPhase::Done,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_resume_of_finished_work_skips_dispatch() {
        assert!(RunPhase::LoadingCheckpoint.can_transition_to(RunPhase::Finalizing));
    }

    #[test]
    fn test_aborting_only_from_active_phases() {
        assert!(RunPhase::Dispatching.can_transition_to(RunPhase::Aborting));
        assert!(RunPhase::Checkpointing.can_transition_to(RunPhase::Aborting));
        assert!(RunPhase::Finalizing.can_transition_to(RunPhase::Aborting));

        assert!(!RunPhase::Init.can_transition_to(RunPhase::Aborting));
        assert!(!RunPhase::Done.can_transition_to(RunPhase::Aborting));
    }

    #[test]
    fn test_terminal_phases_have_no_exits() {
        let all = [
            RunPhase::Init,
            RunPhase::LoadingCheckpoint,
            RunPhase::Dispatching,
            RunPhase::Checkpointing,
            RunPhase::Finalizing,
            RunPhase::Done,
            RunPhase::Interrupted,
            RunPhase::Aborting,
        ];
        for from in all.iter().filter(|p| p.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", RunPhase::LoadingCheckpoint), "loading_checkpoint");
        assert_eq!(format!("{}", RunPhase::Done), "done");
    }
}
