use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;

use comms::msg::{Job, Message, ModelSnapshot, WorkerMeta};
use comms::{BusError, Delivery, Mediator, Topic, topic};
use ml_core::{Batch, ComputeEngine};

use crate::config::WorkerConfig;
use crate::event::{Event, PollKind};
use crate::heartbeat::Heartbeat;
use crate::metrics::WorkerMetrics;
use crate::poll::PollLoop;
use crate::state::{Phase, WorkerState};
use crate::supervisor::WorkerHandle;
use crate::{Result, WorkerErr};

const EVENT_DEPTH: usize = 16;

/// The worker coordinator: a single-consumer state machine driving job
/// acquisition, model synchronization, compute dispatch, result
/// publication and liveness for one worker identity.
///
/// Exactly one task, the consumer loop in [`Worker::run`], mutates the
/// state. The heartbeat timer, the wait loops and the compute step run
/// detached and talk back only through the internal event channel, so no
/// field needs a lock.
pub struct Worker {
    id: usize,
    config: WorkerConfig,
    engine: Arc<dyn ComputeEngine>,
    bus: Mediator,
    state: WorkerState,
    metrics: WorkerMetrics,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    /// Handed to the mediator on startup; `None` afterwards.
    mailbox_tx: Option<mpsc::Sender<Delivery>>,
    mailbox_rx: mpsc::Receiver<Delivery>,
    shutdown: CancellationToken,
    heartbeat: Option<Heartbeat>,
    job_poll: Option<PollLoop>,
    model_poll: Option<PollLoop>,
}

impl Worker {
    /// Builds a worker bound to `bus`. Nothing runs until [`Worker::run`].
    ///
    /// # Args
    /// * `id` - Stable worker identity, also its point-to-point topic key.
    /// * `config` - Cadence and training knobs; validated here.
    /// * `engine` - The numeric step implementation.
    /// * `bus` - Handle to the cluster's mediator.
    ///
    /// # Errors
    /// `WorkerErr::InvalidConfig` if `config` is rejected.
    pub fn new(
        id: usize,
        config: WorkerConfig,
        engine: Arc<dyn ComputeEngine>,
        bus: Mediator,
    ) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_DEPTH);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
        Ok(Self {
            id,
            config,
            engine,
            bus,
            state: WorkerState::default(),
            metrics: WorkerMetrics::default(),
            events_tx,
            events_rx,
            mailbox_tx: Some(mailbox_tx),
            mailbox_rx,
            shutdown: CancellationToken::new(),
            heartbeat: None,
            job_poll: None,
            model_poll: None,
        })
    }

    /// Spawns the consumer loop and returns its supervision handle.
    pub fn spawn(self) -> WorkerHandle {
        let id = self.id;
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());
        WorkerHandle::new(id, shutdown, task)
    }

    /// Runs the worker until shutdown or the first unhandled failure.
    ///
    /// On the way out, graceful or not, the worker cancels its heartbeat
    /// and deregisters with a single `ClearWorker`.
    pub async fn run(mut self) -> Result<()> {
        let outcome = self.serve().await;
        if let Err(e) = &outcome {
            error!(worker_id = self.id; "worker stopping on failure: {e}");
        }
        self.post_stop().await;
        outcome
    }

    async fn serve(&mut self) -> Result<()> {
        if let Some(mailbox) = self.mailbox_tx.take() {
            self.bus.subscribe(topic::BROADCAST, mailbox.clone()).await?;
            self.bus.subscribe(Topic::worker(self.id), mailbox).await?;
        }

        // Join the matching pool before the first beat fires.
        self.publish(Message::Available { worker_id: self.id }).await?;
        self.heartbeat = Some(Heartbeat::start(
            self.config.heartbeat_period,
            self.events_tx.clone(),
        ));
        info!(worker_id = self.id; "worker up");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(worker_id = self.id; "shutdown requested");
                    return Ok(());
                }
                Some(event) = self.events_rx.recv() => {
                    self.on_event(event).await?;
                }
                delivery = self.mailbox_rx.recv() => match delivery {
                    Some(delivery) => self.on_message(delivery).await?,
                    None => return Err(WorkerErr::Bus(BusError::Closed)),
                },
            }
        }
    }

    /// Single entry point for bus traffic; with [`Worker::on_event`], the
    /// only place worker state changes.
    async fn on_message(&mut self, delivery: Delivery) -> Result<()> {
        debug!(worker_id = self.id, kind = delivery.message.kind(), topic = delivery.topic.as_str(); "delivery");
        match delivery.message {
            Message::Job(job) => self.on_job(job).await,
            Message::GiveMeMyJob { job, .. } => self.on_job_reply(job).await,
            Message::ModelUpdate { snapshot } => self.on_model_update(snapshot).await,
            Message::Ack => {
                info!(worker_id = self.id; "ack from master");
                Ok(())
            }
            ack @ (Message::SubscribeAck { .. } | Message::UnsubscribeAck { .. }) => {
                // Cluster listeners watch this feed for membership changes.
                self.publish_to(topic::TOPICS, ack).await
            }
            other => {
                // Unknown traffic is ignored, not fatal.
                debug!(worker_id = self.id; "ignoring {}", other.kind());
                Ok(())
            }
        }
    }

    async fn on_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Heartbeat => self.on_heartbeat().await,
            Event::Poll(PollKind::Job) => self.on_job_poll().await,
            Event::Poll(PollKind::Model) => self.on_model_poll().await,
            Event::ComputeDone(result) => self.on_compute_done(result).await,
        }
    }

    /// A job assignment. At most one is held: anything delivered on top of
    /// an uncompleted job is turned down.
    async fn on_job(&mut self, job: Job) -> Result<()> {
        if self.state.holds_job() {
            info!(worker_id = self.id; "job delivered while one is held, rejecting");
            return self.publish(Message::AlreadyWorking { worker_id: self.id }).await;
        }
        self.accept_job(job).await
    }

    /// The master's reply to a job request: either a job to adopt or
    /// confirmation that none is assigned yet, which starts the wait loop.
    async fn on_job_reply(&mut self, job: Option<Job>) -> Result<()> {
        match job {
            None if self.state.holds_job() => {
                debug!(worker_id = self.id; "empty job reply while holding one, ignoring");
                Ok(())
            }
            None => {
                self.ensure_job_poll();
                Ok(())
            }
            Some(job) if !self.state.holds_job() => {
                info!(worker_id = self.id; "job restored by the master");
                self.accept_job(job).await
            }
            Some(job) => {
                // Redelivery while occupied refreshes the slot only; an
                // in-flight compute keeps the batch it captured.
                info!(worker_id = self.id; "job redelivered while occupied, slot refreshed");
                self.state.job = Some(job);
                Ok(())
            }
        }
    }

    async fn accept_job(&mut self, job: Job) -> Result<()> {
        let batch = Batch::from_samples(&job.work)?;
        info!(worker_id = self.id, samples = batch.rows(), pretrain = job.pretrain; "job accepted");

        let confirm = Message::Job(job.clone());
        self.state.batch = Some(batch);
        self.state.job = Some(job);
        self.stop_job_poll();

        // Confirm by echoing the job back, still not done.
        self.publish(confirm).await?;

        if self.state.has_model() {
            self.dispatch_compute();
        } else {
            self.state.phase = Phase::AwaitingModel;
            self.ensure_model_poll();
        }
        Ok(())
    }

    /// A model broadcast. Last write wins; an empty envelope is a request
    /// trigger, never a snapshot, and cannot clear a held model.
    async fn on_model_update(&mut self, snapshot: Option<ModelSnapshot>) -> Result<()> {
        match snapshot {
            Some(snapshot) => {
                self.state.model = Some(snapshot);
                self.metrics.bump_model_updates();
                self.stop_model_poll();
                debug!(worker_id = self.id; "model snapshot adopted");

                if self.state.phase == Phase::AwaitingModel {
                    if self.state.holds_job() {
                        self.dispatch_compute();
                    } else {
                        self.state.phase = Phase::Idle;
                    }
                }
                Ok(())
            }
            None if self.state.has_model() => {
                debug!(worker_id = self.id; "empty model envelope, snapshot already held");
                Ok(())
            }
            None => {
                info!(worker_id = self.id; "no model available yet, asking the master");
                self.state.phase = Phase::AwaitingModel;
                self.ensure_model_poll();
                Ok(())
            }
        }
    }

    async fn on_heartbeat(&mut self) -> Result<()> {
        self.metrics.bump_heartbeats();
        let meta = WorkerMeta {
            jobs_completed: self.metrics.jobs_completed,
            heartbeats: self.metrics.heartbeats,
            model_updates: self.metrics.model_updates,
            busy: self.state.holds_job(),
        };
        debug!(worker_id = self.id, busy = meta.busy; "heartbeat");
        self.publish(Message::Register { worker_id: self.id, meta }).await?;
        if !self.state.holds_job() {
            // Sole re-entry path into the matching pool between jobs.
            self.publish(Message::Available { worker_id: self.id }).await?;
        }
        Ok(())
    }

    async fn on_job_poll(&mut self) -> Result<()> {
        if self.state.holds_job() {
            self.stop_job_poll();
            return Ok(());
        }
        debug!(worker_id = self.id; "still no job, asking again");
        self.publish(Message::GiveMeMyJob { worker_id: self.id, job: None }).await
    }

    async fn on_model_poll(&mut self) -> Result<()> {
        if self.state.has_model() {
            self.stop_model_poll();
            return Ok(());
        }
        debug!(worker_id = self.id; "still no model, asking again");
        self.publish(Message::NeedsModel { worker_id: self.id }).await
    }

    /// The completion path: report the trained snapshot, flip the job to
    /// done, clear the slot and re-enter the pool.
    ///
    /// The result is not adopted as the local model. The master's next
    /// broadcast supplies the merged one, and a broadcast that landed
    /// while the step ran must stay the newest write.
    async fn on_compute_done(&mut self, result: Result<ModelSnapshot>) -> Result<()> {
        let trained = result?;
        self.state.phase = Phase::Publishing;
        self.publish(Message::ModelUpdate { snapshot: Some(trained) }).await?;

        if let Some(mut job) = self.state.job.take() {
            job.done = true;
            self.publish(Message::Job(job)).await?;
        } else {
            warn!(worker_id = self.id; "compute finished with an empty job slot");
        }
        self.state.batch = None;
        self.metrics.bump_jobs();

        self.publish(Message::Available { worker_id: self.id }).await?;
        self.state.phase = Phase::Idle;
        info!(worker_id = self.id, jobs_completed = self.metrics.jobs_completed; "job finished");
        Ok(())
    }

    /// Hands the exclusive compute step to the blocking pool. The task owns
    /// deep copies of the snapshot and batch and reports back through the
    /// event channel only.
    fn dispatch_compute(&mut self) {
        let (Some(model), Some(batch), Some(job)) = (
            self.state.model.clone(),
            self.state.batch.clone(),
            self.state.job.as_ref(),
        ) else {
            // Callers check these; tolerate the gap instead of panicking.
            warn!(worker_id = self.id; "compute dispatch without job, batch and model");
            return;
        };
        let pretrain = job.pretrain;

        let engine = Arc::clone(&self.engine);
        let learning_rate = self.config.learning_rate;
        let epochs = self.config.finetune_epochs;
        let params = self.config.pretrain;
        let events = self.events_tx.clone();
        let worker_id = self.id;

        tokio::spawn(async move {
            let outcome = task::spawn_blocking(move || -> Result<ModelSnapshot> {
                let mut model = model;
                if pretrain {
                    engine.pretrain(&mut model, &batch, &params)?;
                } else {
                    engine.finetune(&mut model, &batch, learning_rate, epochs)?;
                }
                Ok(model)
            })
            .await
            .unwrap_or_else(|e| Err(WorkerErr::Panicked(e.to_string())));

            if events.send(Event::ComputeDone(outcome)).await.is_err() {
                debug!(worker_id = worker_id; "compute finished after the worker stopped");
            }
        });

        self.state.phase = Phase::Working;
        debug!(worker_id = self.id, pretrain = pretrain; "compute dispatched");
    }

    fn ensure_job_poll(&mut self) {
        if self.job_poll.is_none() {
            info!(worker_id = self.id; "waiting for a job assignment");
            self.job_poll = Some(PollLoop::start(
                PollKind::Job,
                self.config.job_poll_interval,
                self.events_tx.clone(),
            ));
        }
    }

    fn stop_job_poll(&mut self) {
        if let Some(poll) = self.job_poll.take() {
            poll.stop();
        }
    }

    fn ensure_model_poll(&mut self) {
        if self.model_poll.is_none() {
            info!(worker_id = self.id; "waiting for a model snapshot");
            self.model_poll = Some(PollLoop::start(
                PollKind::Model,
                self.config.model_poll_interval,
                self.events_tx.clone(),
            ));
        }
    }

    fn stop_model_poll(&mut self) {
        if let Some(poll) = self.model_poll.take() {
            poll.stop();
        }
    }

    async fn publish(&self, message: Message) -> Result<()> {
        self.publish_to(topic::MASTER, message).await
    }

    async fn publish_to(&self, topic: Topic, message: Message) -> Result<()> {
        self.bus.publish(topic, message).await?;
        Ok(())
    }

    /// Shared by graceful stops and failures: cancel the heartbeat, stop
    /// the wait loops, deregister.
    async fn post_stop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
        }
        self.stop_job_poll();
        self.stop_model_poll();

        // Best effort: the bus may be the reason we are stopping.
        let clear = Message::ClearWorker { worker_id: self.id };
        if self.bus.publish(topic::MASTER, clear).await.is_err() {
            warn!(worker_id = self.id; "could not deregister, bus is gone");
        } else {
            info!(worker_id = self.id; "worker cleared");
        }
    }
}
