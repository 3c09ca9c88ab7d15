//! The worker side of the training cluster: a state machine that acquires
//! jobs from the master, keeps a model snapshot in sync, runs the compute
//! step off the hot path, reports results and heartbeats for liveness.

pub mod config;
pub mod error;
mod event;
mod heartbeat;
pub mod metrics;
mod poll;
pub mod state;
pub mod supervisor;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{Result, WorkerErr};
pub use metrics::WorkerMetrics;
pub use state::Phase;
pub use supervisor::WorkerHandle;
pub use worker::Worker;
