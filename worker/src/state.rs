use comms::msg::{Job, ModelSnapshot};
use ml_core::Batch;

/// Coordinator phases.
///
/// `Publishing` only spans the completion handler; it exists so the
/// lifecycle reads the same way the protocol does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No job held, availability announced.
    #[default]
    Idle,
    /// A job (or a bare request) is waiting on a model snapshot.
    AwaitingModel,
    /// A compute step is in flight.
    Working,
    /// A compute result is being reported.
    Publishing,
}

/// State owned exclusively by the coordinator's consumer loop. Nothing
/// else holds a reference to it, so no field needs a lock.
#[derive(Debug, Default)]
pub struct WorkerState {
    pub phase: Phase,
    /// The single job slot: at most one uncompleted job at a time.
    pub job: Option<Job>,
    /// Last adopted snapshot, replaced wholesale and never merged.
    pub model: Option<ModelSnapshot>,
    /// Batch stacked from the current job's work list.
    pub batch: Option<Batch>,
}

impl WorkerState {
    pub fn holds_job(&self) -> bool {
        self.job.is_some()
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }
}
