use std::{env, io, sync::Arc, time::Duration};

use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::timeout;

use comms::msg::{Job, Message, Sample};
use comms::{Delivery, Mediator, Topic, topic};
use ml_core::{Batch, FeedForwardEngine, Network};
use worker::{Worker, WorkerConfig};

const DEFAULT_WORKERS: usize = 2;
const ROUNDS: usize = 2;

/// Small self-contained cluster: a mediator, a couple of workers and a
/// stand-in driver playing the master over the OR truth table. One
/// pretraining round, then one finetuning round.
#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let workers = match env::var("WORKERS") {
        Ok(raw) => raw.parse().map_err(io::Error::other)?,
        Err(_) => DEFAULT_WORKERS,
    };

    let bus = Mediator::spawn();
    tokio::select! {
        ret = drive(&bus, workers) => {
            ret?;
            info!("wrapping up");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
        }
    }

    Ok(())
}

async fn drive(bus: &Mediator, workers: usize) -> io::Result<()> {
    let (master_tx, mut master_rx) = mpsc::channel(64);
    bus.subscribe(topic::MASTER, master_tx)
        .await
        .map_err(io::Error::other)?;
    next(&mut master_rx).await?; // our own subscribe ack

    let config = WorkerConfig {
        heartbeat_period: Duration::from_secs(2),
        job_poll_interval: Duration::from_secs(1),
        model_poll_interval: Duration::from_secs(1),
        ..WorkerConfig::default()
    };
    let engine = Arc::new(FeedForwardEngine);

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let worker = Worker::new(id, config.clone(), engine.clone(), bus.clone())
            .map_err(io::Error::other)?;
        handles.push(worker.spawn());
    }

    // Every worker announces itself before any job goes out.
    let mut waiting = workers;
    let mut seen = vec![false; workers];
    while waiting > 0 {
        if let Message::Available { worker_id } = next(&mut master_rx).await?.message {
            if let Some(slot) = seen.get_mut(worker_id) {
                if !*slot {
                    *slot = true;
                    waiting -= 1;
                }
            }
        }
    }
    info!(workers = workers; "cluster up");

    let mut rng = StdRng::seed_from_u64(42);
    let mut model = Network::random(&[2, 3, 1], &mut rng)
        .map_err(io::Error::other)?
        .snapshot();
    let dataset = or_samples(workers * 2);

    for round in 0..ROUNDS {
        bus.publish(
            topic::BROADCAST,
            Message::ModelUpdate { snapshot: Some(model.clone()) },
        )
        .await
        .map_err(io::Error::other)?;

        let pretrain = round == 0;
        info!(round = round, pretrain = pretrain; "assigning jobs");
        for id in 0..workers {
            let job = Job {
                worker_id: id,
                work: dataset[id * 2..id * 2 + 2].to_vec(),
                pretrain,
                done: false,
            };
            bus.publish(Topic::worker(id), Message::Job(job))
                .await
                .map_err(io::Error::other)?;
        }

        // Collect a trained snapshot and a completion report per worker.
        // The newest result stands in for the out-of-scope reducer.
        let mut done = 0;
        while done < workers {
            match next(&mut master_rx).await?.message {
                Message::ModelUpdate { snapshot: Some(snapshot) } => model = snapshot,
                Message::Job(job) if job.done => {
                    info!(worker_id = job.worker_id; "job reported done");
                    done += 1;
                }
                Message::AlreadyWorking { worker_id } => {
                    warn!(worker_id = worker_id; "a job bounced off a busy worker");
                }
                _ => {}
            }
        }
    }

    let batch = Batch::from_samples(&dataset).map_err(io::Error::other)?;
    let network = Network::from_snapshot(&model).map_err(io::Error::other)?;
    let mse = network.mse(&batch).map_err(io::Error::other)?;
    info!(mse = mse as f64; "final model error");

    for handle in handles {
        let worker_id = handle.worker_id();
        if let Err(e) = handle.stop().await {
            warn!(worker_id = worker_id; "worker exited with: {e}");
        }
    }
    Ok(())
}

async fn next(rx: &mut mpsc::Receiver<Delivery>) -> io::Result<Delivery> {
    match timeout(Duration::from_secs(30), rx.recv()).await {
        Ok(Some(delivery)) => Ok(delivery),
        Ok(None) => Err(io::Error::other("master mailbox closed")),
        Err(_) => Err(io::Error::other("timed out waiting for the cluster")),
    }
}

/// The OR truth table, repeated to give every worker two samples.
fn or_samples(count: usize) -> Vec<Sample> {
    let table = [
        ([0.0, 0.0], [0.0]),
        ([0.0, 1.0], [1.0]),
        ([1.0, 0.0], [1.0]),
        ([1.0, 1.0], [1.0]),
    ];
    (0..count)
        .map(|i| {
            let (input, target) = table[i % table.len()];
            Sample {
                input: input.to_vec(),
                target: target.to_vec(),
            }
        })
        .collect()
}
