use comms::msg::ModelSnapshot;

use crate::Result;

/// What a wait loop is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollKind {
    Job,
    Model,
}

/// Internal events fed to the coordinator by its own timers and detached
/// tasks. Bus traffic arrives separately, as deliveries.
#[derive(Debug)]
pub(crate) enum Event {
    /// The liveness timer fired.
    Heartbeat,
    /// A wait loop asks the coordinator to re-check and maybe re-request.
    Poll(PollKind),
    /// The detached compute task finished, one way or the other.
    ComputeDone(Result<ModelSnapshot>),
}
