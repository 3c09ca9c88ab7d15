use serde::{Deserialize, Serialize};

use crate::topic::Topic;

/// One labeled training sample: an input row and its expected output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f32>,
    pub target: Vec<f32>,
}

/// A unit of work assigned to exactly one worker.
///
/// Jobs are created by the master, never by a worker. A worker holds at
/// most one job at a time; it lives in the job slot until the completion
/// report goes out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The worker this job belongs to.
    pub worker_id: usize,
    /// Ordered input/target pairs to train on.
    pub work: Vec<Sample>,
    /// Selects the pretraining step instead of the finetuning step.
    pub pretrain: bool,
    /// Flipped by the worker when the job has been computed and reported.
    pub done: bool,
}

/// Weights of one dense layer, flattened row-major (`inputs` x `outputs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerState {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// A complete copy of the shared model at a point in time.
///
/// Snapshots are replaced wholesale on arrival; they are never merged or
/// patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub layers: Vec<LayerState>,
}

/// Liveness metadata carried by worker registration beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerMeta {
    pub jobs_completed: u64,
    /// Beats sent so far, this one included.
    pub heartbeats: u64,
    /// Model broadcasts adopted so far.
    pub model_updates: u64,
    pub busy: bool,
}

/// Application-level message set exchanged over the bus by the master,
/// the workers and the mediator itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    /// Master to worker: a job assignment. Worker to master: the same job
    /// echoed back, as a work confirmation (`done == false`) or as a
    /// completion report (`done == true`).
    Job(Job),
    /// Worker to master: rejection of a job delivered while one is held.
    AlreadyWorking { worker_id: usize },
    /// Worker to master (`job == None`): a (re)delivery request.
    /// Master to worker: the reply, carrying the job if one is assigned.
    GiveMeMyJob { worker_id: usize, job: Option<Job> },
    /// Worker to master: ask for a model broadcast.
    NeedsModel { worker_id: usize },
    /// Master to workers: a model broadcast. An empty envelope means "no
    /// model available yet". Worker to master: the trained result.
    ModelUpdate { snapshot: Option<ModelSnapshot> },
    /// Master to worker: informational acknowledgement.
    Ack,
    /// Worker to master: deregistration notice on shutdown.
    ClearWorker { worker_id: usize },
    /// Worker to master: periodic liveness registration.
    Register { worker_id: usize, meta: WorkerMeta },
    /// Worker to master: the worker holds no job and can take one.
    Available { worker_id: usize },
    /// Mediator to subscriber: subscription confirmed.
    SubscribeAck { topic: Topic },
    /// Mediator to subscriber: unsubscription confirmed.
    UnsubscribeAck { topic: Topic },
}

impl Message {
    /// Short, stable name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Job(_) => "job",
            Message::AlreadyWorking { .. } => "already-working",
            Message::GiveMeMyJob { .. } => "give-me-my-job",
            Message::NeedsModel { .. } => "needs-model",
            Message::ModelUpdate { .. } => "model-update",
            Message::Ack => "ack",
            Message::ClearWorker { .. } => "clear-worker",
            Message::Register { .. } => "register",
            Message::Available { .. } => "available",
            Message::SubscribeAck { .. } => "subscribe-ack",
            Message::UnsubscribeAck { .. } => "unsubscribe-ack",
        }
    }
}
