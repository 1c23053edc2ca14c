//! Worker lifecycle states.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle state of one worker.
///
/// ```text
/// Constructed ──► Started ──► Running ──► StopRequested ──► Stopped
///      │             │           │              │
///      └─► Stopped   └───────────┴──────────────┴──► Failed
/// ```
///
/// `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Worker built, execution context not launched.
    Constructed,
    /// Execution context launched, initialization in progress.
    Started,
    /// Accepting commands (or streaming, for looping workers).
    Running,
    /// Stop requested, waiting for the worker to wind down.
    StopRequested,
    /// Worker signalled completion.
    Stopped,
    /// Setup, initialization or runtime failure.
    Failed,
}

impl WorkerState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Constructed, Started | Stopped | Failed)
                | (Started, Running | StopRequested | Stopped | Failed)
                | (Running, StopRequested | Stopped | Failed)
                | (StopRequested, Stopped | Failed)
        )
    }

    /// `Stopped` or `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Whether the execution context has been launched and not yet finished.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Running | Self::StopRequested)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Constructed => "constructed",
            Self::Started => "started",
            Self::Running => "running",
            Self::StopRequested => "stop_requested",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Shared, observable worker state.
///
/// Cloned into the worker's context and kept by the supervisor. Transitions
/// the lifecycle does not allow are ignored, which makes repeated stop
/// requests harmless.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<WorkerState>>,
}

impl StateCell {
    pub fn new(initial: WorkerState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn get(&self) -> WorkerState {
        *self.tx.borrow()
    }

    /// Move to `next` if the lifecycle allows it. Returns whether the state changed.
    pub fn advance(&self, next: WorkerState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.tx.subscribe()
    }
}
