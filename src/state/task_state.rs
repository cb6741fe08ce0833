/// Task lifecycle states
///
/// A worker drives a task `Dequeued -> Running -> {Completed | Rearmed | Abandoned}`.
/// Running and abandoned tasks whose deadline elapses become `Requeued` through the
/// retry sweep; re-armed seed tasks are dequeued again once their crontab entry fires.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Taken from a crawler's FIFO queue by a worker
    Dequeued,

    /// A running record with a deadline has been persisted
    Running,

    /// Processed successfully, nothing scheduled
    Completed,

    /// Processed successfully and re-armed in the crontab store
    Rearmed,

    /// Processing failed; the running record is left for the retry sweep
    Abandoned,

    /// Reclaimed by the retry sweep and put back on the queue
    Requeued,
}

impl TaskState {
    /// Returns true when a worker is done with the task
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rearmed | Self::Abandoned)
    }

    /// Returns true if processing succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Rearmed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Dequeued, Running)
                | (Running, Completed)
                | (Running, Rearmed)
                | (Running, Abandoned)
                | (Running, Requeued)
                | (Abandoned, Requeued)
                | (Requeued, Dequeued)
                | (Rearmed, Dequeued)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dequeued => "dequeued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Rearmed => "rearmed",
            Self::Abandoned => "abandoned",
            Self::Requeued => "requeued",
        }
    }

    /// Returns all task states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Dequeued,
            Self::Running,
            Self::Completed,
            Self::Rearmed,
            Self::Abandoned,
            Self::Requeued,
        ]
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
