use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Result, WorkerErr};

/// Supervision surface for a spawned worker.
///
/// The policy is stop-on-failure: the first unhandled error ends the
/// worker task, and nothing here restarts it. Whoever holds the handle
/// decides whether to spawn a replacement; the master notices the silence
/// through the missing heartbeats either way.
#[derive(Debug)]
pub struct WorkerHandle {
    worker_id: usize,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        worker_id: usize,
        shutdown: CancellationToken,
        task: JoinHandle<Result<()>>,
    ) -> Self {
        Self {
            worker_id,
            shutdown,
            task,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Asks the worker to stop once the message it is on is handled.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Waits for the worker task and surfaces its outcome.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(WorkerErr::Panicked(e.to_string())),
        }
    }

    /// Signals shutdown and waits it out.
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        self.join().await
    }
}
