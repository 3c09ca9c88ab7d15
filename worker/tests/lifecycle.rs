//! Liveness, shutdown and the stop-on-failure policy.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use comms::msg::{Job, LayerState, Message, ModelSnapshot, Sample};
use comms::{Delivery, Mediator, Topic, topic};
use ml_core::{Batch, ComputeEngine, MlError, PretrainParams};
use worker::{Worker, WorkerConfig, WorkerErr, WorkerHandle};

fn quick_config() -> WorkerConfig {
    WorkerConfig {
        heartbeat_period: Duration::from_millis(40),
        job_poll_interval: Duration::from_millis(25),
        model_poll_interval: Duration::from_millis(25),
        ..WorkerConfig::default()
    }
}

fn snapshot() -> ModelSnapshot {
    ModelSnapshot {
        layers: vec![LayerState {
            inputs: 2,
            outputs: 1,
            weights: vec![0.5, 0.5],
            bias: vec![0.0],
        }],
    }
}

fn job(worker_id: usize) -> Job {
    Job {
        worker_id,
        work: vec![
            Sample { input: vec![0.0, 1.0], target: vec![1.0] },
            Sample { input: vec![1.0, 0.0], target: vec![1.0] },
        ],
        pretrain: false,
        done: false,
    }
}

/// Engine that completes instantly, or fails every step, or blocks until
/// released, depending on the mode.
enum MockEngine {
    Ok,
    Failing,
    Gated(std::sync::Mutex<std::sync::mpsc::Receiver<()>>),
}

impl MockEngine {
    fn gated() -> (Arc<Self>, std::sync::mpsc::Sender<()>) {
        let (release, gate) = std::sync::mpsc::channel();
        (Arc::new(Self::Gated(std::sync::Mutex::new(gate))), release)
    }

    fn step(&self) -> ml_core::Result<()> {
        match self {
            MockEngine::Ok => Ok(()),
            MockEngine::Failing => Err(MlError::InvalidInput("exploding gradients")),
            MockEngine::Gated(gate) => {
                let _ = gate.lock().unwrap().recv();
                Ok(())
            }
        }
    }
}

impl ComputeEngine for MockEngine {
    fn pretrain(
        &self,
        _model: &mut ModelSnapshot,
        _batch: &Batch,
        _params: &PretrainParams,
    ) -> ml_core::Result<()> {
        self.step()
    }

    fn finetune(
        &self,
        _model: &mut ModelSnapshot,
        _batch: &Batch,
        _learning_rate: f32,
        _epochs: usize,
    ) -> ml_core::Result<()> {
        self.step()
    }
}

async fn recv(rx: &mut mpsc::Receiver<Delivery>) -> Delivery {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("master mailbox closed")
}

async fn expect_kind(rx: &mut mpsc::Receiver<Delivery>, kind: &str) -> Message {
    loop {
        let delivery = recv(rx).await;
        if delivery.message.kind() == kind {
            return delivery.message;
        }
    }
}

async fn master(bus: &Mediator) -> mpsc::Receiver<Delivery> {
    let (tx, mut rx) = mpsc::channel(64);
    bus.subscribe(topic::MASTER, tx).await.unwrap();
    let ack = recv(&mut rx).await;
    assert!(matches!(ack.message, Message::SubscribeAck { .. }));
    rx
}

async fn start_worker(
    bus: &Mediator,
    master_rx: &mut mpsc::Receiver<Delivery>,
    id: usize,
    engine: Arc<MockEngine>,
) -> WorkerHandle {
    let worker = Worker::new(id, quick_config(), engine, bus.clone()).unwrap();
    let handle = worker.spawn();
    expect_kind(master_rx, "available").await;
    handle
}

/// Collects kinds until the mailbox stays quiet for `window`. Only
/// meaningful once the worker is down; a live heartbeat never goes quiet.
async fn drain_until_quiet(
    rx: &mut mpsc::Receiver<Delivery>,
    window: Duration,
) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    let hard_deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while let Ok(Some(delivery)) = timeout(window, rx.recv()).await {
        kinds.push(delivery.message.kind());
        assert!(
            tokio::time::Instant::now() < hard_deadline,
            "traffic never went quiet: {kinds:?}"
        );
    }
    kinds
}

/// Collects every kind arriving within `window`, chatter included.
async fn drain_window(rx: &mut mpsc::Receiver<Delivery>, window: Duration) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return kinds;
        }
        match timeout(remaining, rx.recv()).await {
            Ok(Some(delivery)) => kinds.push(delivery.message.kind()),
            Ok(None) | Err(_) => return kinds,
        }
    }
}

#[tokio::test]
async fn heartbeats_carry_liveness_metadata() {
    let bus = Mediator::spawn();
    let mut master_rx = master(&bus).await;
    let handle = start_worker(&bus, &mut master_rx, 9, Arc::new(MockEngine::Ok)).await;
    assert_eq!(handle.worker_id(), 9);

    let Message::Register { worker_id, meta } = expect_kind(&mut master_rx, "register").await
    else {
        unreachable!()
    };
    assert_eq!(worker_id, 9);
    assert!(!meta.busy);
    assert_eq!(meta.jobs_completed, 0);
    assert_eq!(meta.heartbeats, 1);
    assert_eq!(meta.model_updates, 0);

    // The beat repeats with a growing count, and an idle worker keeps
    // re-announcing itself.
    let Message::Register { meta: next, .. } = expect_kind(&mut master_rx, "register").await
    else {
        unreachable!()
    };
    assert_eq!(next.heartbeats, 2);
    expect_kind(&mut master_rx, "available").await;

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn startup_acks_reach_the_topic_listeners() {
    let bus = Mediator::spawn();
    let (tx, mut topics_rx) = mpsc::channel(16);
    bus.subscribe(topic::TOPICS, tx).await.unwrap();
    let own = recv(&mut topics_rx).await;
    assert!(matches!(own.message, Message::SubscribeAck { .. }));

    let mut master_rx = master(&bus).await;
    let handle = start_worker(&bus, &mut master_rx, 3, Arc::new(MockEngine::Ok)).await;

    // The worker republishes each of its subscription acks on the
    // listener topic: the broadcast feed first, then its own address.
    let first = recv(&mut topics_rx).await;
    assert_eq!(first.topic, topic::TOPICS);
    assert_eq!(
        first.message,
        Message::SubscribeAck { topic: topic::BROADCAST }
    );
    let second = recv(&mut topics_rx).await;
    assert_eq!(
        second.message,
        Message::SubscribeAck { topic: Topic::worker(3) }
    );

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn a_working_heartbeat_reports_busy() {
    let bus = Mediator::spawn();
    let mut master_rx = master(&bus).await;
    let (engine, release) = MockEngine::gated();
    let handle = start_worker(&bus, &mut master_rx, 1, engine).await;

    bus.publish(
        topic::BROADCAST,
        Message::ModelUpdate { snapshot: Some(snapshot()) },
    )
    .await
    .unwrap();
    bus.publish(Topic::worker(1), Message::Job(job(1)))
        .await
        .unwrap();
    expect_kind(&mut master_rx, "job").await; // confirmation

    let Message::Register { meta, .. } = expect_kind(&mut master_rx, "register").await else {
        unreachable!()
    };
    assert!(meta.busy);

    release.send(()).unwrap();
    expect_kind(&mut master_rx, "model-update").await;
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_deregisters_once_and_silences_the_heartbeat() {
    let bus = Mediator::spawn();
    let mut master_rx = master(&bus).await;
    let handle = start_worker(&bus, &mut master_rx, 5, Arc::new(MockEngine::Ok)).await;

    // Let a few beats through first.
    expect_kind(&mut master_rx, "register").await;
    expect_kind(&mut master_rx, "register").await;

    handle.stop().await.unwrap();

    // Whatever was already queued drains, then one clear, then silence.
    let kinds = drain_until_quiet(&mut master_rx, Duration::from_millis(200)).await;
    let clears = kinds.iter().filter(|kind| **kind == "clear-worker").count();
    assert_eq!(clears, 1, "saw {kinds:?}");
    assert_eq!(kinds.last(), Some(&"clear-worker"), "saw {kinds:?}");
}

#[tokio::test]
async fn a_failing_compute_step_stops_the_worker() {
    let bus = Mediator::spawn();
    let mut master_rx = master(&bus).await;
    let handle = start_worker(&bus, &mut master_rx, 8, Arc::new(MockEngine::Failing)).await;

    bus.publish(
        topic::BROADCAST,
        Message::ModelUpdate { snapshot: Some(snapshot()) },
    )
    .await
    .unwrap();
    bus.publish(Topic::worker(8), Message::Job(job(8)))
        .await
        .unwrap();
    expect_kind(&mut master_rx, "job").await; // confirmation goes out

    // Then the worker dies: it deregisters without publishing a result.
    expect_kind(&mut master_rx, "clear-worker").await;
    let kinds = drain_until_quiet(&mut master_rx, Duration::from_millis(200)).await;
    assert!(!kinds.contains(&"model-update"), "saw {kinds:?}");

    let outcome = handle.join().await;
    assert!(matches!(outcome, Err(WorkerErr::Compute(_))), "{outcome:?}");
}

#[tokio::test]
async fn a_malformed_job_is_fatal() {
    let bus = Mediator::spawn();
    let mut master_rx = master(&bus).await;
    let handle = start_worker(&bus, &mut master_rx, 2, Arc::new(MockEngine::Ok)).await;

    let empty = Job {
        worker_id: 2,
        work: vec![],
        pretrain: false,
        done: false,
    };
    bus.publish(Topic::worker(2), Message::Job(empty))
        .await
        .unwrap();

    // No confirmation is ever published for a job that cannot be stacked.
    expect_kind(&mut master_rx, "clear-worker").await;
    let outcome = handle.join().await;
    assert!(
        matches!(outcome, Err(WorkerErr::Compute(MlError::InvalidInput(_)))),
        "{outcome:?}"
    );
}

#[tokio::test]
async fn recovers_its_job_through_the_redelivery_request() {
    let bus = Mediator::spawn();
    let mut master_rx = master(&bus).await;
    let handle = start_worker(&bus, &mut master_rx, 11, Arc::new(MockEngine::Ok)).await;

    // Master says nothing is assigned: the worker starts asking.
    bus.publish(
        Topic::worker(11),
        Message::GiveMeMyJob { worker_id: 11, job: None },
    )
    .await
    .unwrap();

    let request = expect_kind(&mut master_rx, "give-me-my-job").await;
    assert_eq!(request, Message::GiveMeMyJob { worker_id: 11, job: None });
    // The request repeats on the backoff.
    expect_kind(&mut master_rx, "give-me-my-job").await;

    // Hand the job over through the reply form.
    bus.publish(
        topic::BROADCAST,
        Message::ModelUpdate { snapshot: Some(snapshot()) },
    )
    .await
    .unwrap();
    bus.publish(
        Topic::worker(11),
        Message::GiveMeMyJob { worker_id: 11, job: Some(job(11)) },
    )
    .await
    .unwrap();

    let Message::Job(confirmed) = expect_kind(&mut master_rx, "job").await else {
        unreachable!()
    };
    assert!(!confirmed.done);
    expect_kind(&mut master_rx, "model-update").await;
    let Message::Job(report) = expect_kind(&mut master_rx, "job").await else {
        unreachable!()
    };
    assert!(report.done);

    // Acquisition ended: no more redelivery requests.
    let kinds = drain_window(&mut master_rx, Duration::from_millis(150)).await;
    assert!(!kinds.contains(&"give-me-my-job"), "saw {kinds:?}");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn stopping_mid_compute_still_deregisters() {
    let bus = Mediator::spawn();
    let mut master_rx = master(&bus).await;
    let (engine, release) = MockEngine::gated();
    let handle = start_worker(&bus, &mut master_rx, 4, engine).await;

    bus.publish(
        topic::BROADCAST,
        Message::ModelUpdate { snapshot: Some(snapshot()) },
    )
    .await
    .unwrap();
    bus.publish(Topic::worker(4), Message::Job(job(4)))
        .await
        .unwrap();
    expect_kind(&mut master_rx, "job").await; // confirmation

    // Stop while the step is still gated.
    handle.stop().await.unwrap();
    drop(release);

    let kinds = drain_until_quiet(&mut master_rx, Duration::from_millis(200)).await;
    let clears = kinds.iter().filter(|kind| **kind == "clear-worker").count();
    assert_eq!(clears, 1, "saw {kinds:?}");
    // The abandoned step publishes nothing.
    assert!(!kinds.contains(&"model-update"), "saw {kinds:?}");
}
