//! Scan lifecycle state and the events a run emits.

use serde::Serialize;

use super::progress::ProgressSnapshot;

/// Lifecycle of the orchestrator.
///
/// `Completed` and `Failed` are terminal; a fresh `start` leaves them for
/// `Running`. An aborted run ends in `Failed` with [`CompletionReason::Aborted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ScanState {
    /// No run has been started yet
    #[default]
    Idle,
    /// Worker is executing steps
    Running,
    /// Worker is blocked on the pause gate
    Paused,
    /// Abort requested, worker has not yet observed it
    Aborting,
    /// Plan exhausted
    Completed,
    /// Run ended by an error or an abort
    Failed,
}

impl ScanState {
    /// Whether a worker owns the run.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Aborting)
    }

    /// Whether the state ends a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionReason {
    /// Every step of the plan ran
    Completed,
    /// The user aborted the run
    Aborted,
    /// A device error ended the run
    Failed,
    /// The worker panicked
    Unexpected,
}

/// Message from a scan worker, delivered in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScanEvent {
    /// Human-readable status line
    Status {
        /// Message text
        message: String,
        /// Warning or error rather than plain progress
        is_error: bool,
    },
    /// Emitted after every completed step
    Progress(ProgressSnapshot),
    /// Emitted exactly once per accepted `start`
    Completed {
        /// True only for [`CompletionReason::Completed`]
        success: bool,
        /// Exit path taken
        reason: CompletionReason,
        /// Final status text
        message: String,
    },
}
