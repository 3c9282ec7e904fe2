use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases of a single dispatch invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchPhase {
    /// No run in flight
    Idle,
    /// Operator lock held
    LockAcquired,
    /// Reserve read and above the fuel threshold
    ReserveChecked,
    /// Eligible vessels partitioned by destination and class
    Grouping,
    /// Evaluating and departing vessels one at a time
    PerUnitLoop,
    /// Emitting the final chunk and post-run hooks
    Flushing,
    /// Run finished (possibly with per-vessel failures)
    Completed,
    /// Run stopped before any vessel was touched
    Aborted,
}

impl DispatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchPhase::Idle => "IDLE",
            DispatchPhase::LockAcquired => "LOCK_ACQUIRED",
            DispatchPhase::ReserveChecked => "RESERVE_CHECKED",
            DispatchPhase::Grouping => "GROUPING",
            DispatchPhase::PerUnitLoop => "PER_UNIT_LOOP",
            DispatchPhase::Flushing => "FLUSHING",
            DispatchPhase::Completed => "COMPLETED",
            DispatchPhase::Aborted => "ABORTED",
        }
    }

    /// Check if this phase can transition to another phase
    pub fn can_transition_to(&self, target: DispatchPhase) -> bool {
        use DispatchPhase::*;

        match (self, target) {
            (Idle, LockAcquired) => true,
            // Lock conflict
            (Idle, Aborted) => true,

            (LockAcquired, ReserveChecked) => true,
            (LockAcquired, Aborted) => true,

            (ReserveChecked, Grouping) => true,
            // Insufficient fuel
            (ReserveChecked, Aborted) => true,
            // No eligible vessels
            (ReserveChecked, Completed) => true,

            (Grouping, PerUnitLoop) => true,

            // Once the loop has started the run always completes
            (PerUnitLoop, Flushing) => true,
            (Flushing, Completed) => true,

            (Completed, Idle) => true,
            (Aborted, Idle) => true,

            _ => false,
        }
    }

    /// Is this a terminal phase for the current run?
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchPhase::Completed | DispatchPhase::Aborted)
    }
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
