/// Lifetime counters of one worker, reported as heartbeat metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerMetrics {
    pub jobs_completed: u64,
    pub heartbeats: u64,
    pub model_updates: u64,
}

impl WorkerMetrics {
    #[inline]
    pub fn bump_jobs(&mut self) {
        self.jobs_completed += 1;
    }

    #[inline]
    pub fn bump_heartbeats(&mut self) {
        self.heartbeats += 1;
    }

    #[inline]
    pub fn bump_model_updates(&mut self) {
        self.model_updates += 1;
    }
}
