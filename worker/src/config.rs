use std::time::Duration;

use serde::{Deserialize, Serialize};

use ml_core::PretrainParams;

use crate::{Result, WorkerErr};

/// Tunable knobs for one worker instance.
///
/// The defaults carry the production cadence: ten-second heartbeat and job
/// polling, fifteen-second model polling. Tests shrink the intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Heartbeat period, also used as the delay before the first beat.
    pub heartbeat_period: Duration,
    /// Backoff between job requests while no job is held.
    pub job_poll_interval: Duration,
    /// Backoff between model requests while no snapshot is held.
    pub model_poll_interval: Duration,
    /// Depth of the bus mailbox; deliveries beyond it are dropped.
    pub mailbox_capacity: usize,
    /// Step size of the finetuning step.
    pub learning_rate: f32,
    /// Passes over the batch per finetuning job.
    pub finetune_epochs: usize,
    /// Extra parameters handed to the pretraining step.
    pub pretrain: PretrainParams,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(10),
            job_poll_interval: Duration::from_secs(10),
            model_poll_interval: Duration::from_secs(15),
            mailbox_capacity: 64,
            learning_rate: 0.1,
            finetune_epochs: 100,
            pretrain: PretrainParams::default(),
        }
    }
}

impl WorkerConfig {
    /// Rejects configurations the worker cannot run with.
    ///
    /// # Errors
    /// `WorkerErr::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_period.is_zero() {
            return Err(WorkerErr::InvalidConfig("heartbeat period must be non-zero"));
        }
        if self.job_poll_interval.is_zero() || self.model_poll_interval.is_zero() {
            return Err(WorkerErr::InvalidConfig("poll intervals must be non-zero"));
        }
        if self.mailbox_capacity == 0 {
            return Err(WorkerErr::InvalidConfig("mailbox capacity must be non-zero"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(WorkerErr::InvalidConfig(
                "learning rate must be positive and finite",
            ));
        }
        if self.finetune_epochs == 0 {
            return Err(WorkerErr::InvalidConfig("finetune epochs must be non-zero"));
        }
        Ok(())
    }
}
