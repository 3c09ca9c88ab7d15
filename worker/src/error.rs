use std::error::Error;
use std::fmt;

use comms::BusError;
use ml_core::MlError;

/// The worker crate's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures. Any of these stops the worker instance; there
/// is no in-place recovery.
#[derive(Debug)]
pub enum WorkerErr {
    /// Rejected configuration, caught before anything is spawned.
    InvalidConfig(&'static str),
    /// The message bus is gone; the worker cannot participate any more.
    Bus(BusError),
    /// The compute step reported a numeric failure.
    Compute(MlError),
    /// A task died underneath us instead of returning.
    Panicked(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::InvalidConfig(msg) => write!(f, "invalid worker config: {msg}"),
            WorkerErr::Bus(e) => write!(f, "bus failure: {e}"),
            WorkerErr::Compute(e) => write!(f, "compute failure: {e}"),
            WorkerErr::Panicked(msg) => write!(f, "task died: {msg}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Bus(e) => Some(e),
            WorkerErr::Compute(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BusError> for WorkerErr {
    fn from(value: BusError) -> Self {
        Self::Bus(value)
    }
}

impl From<MlError> for WorkerErr {
    fn from(value: MlError) -> Self {
        Self::Compute(value)
    }
}
