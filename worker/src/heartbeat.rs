use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::event::Event;

/// Recurring liveness timer.
///
/// Delivers `Event::Heartbeat` into the coordinator loop after an initial
/// delay of one period and then once per period. The timer holds no
/// worker state; what a beat publishes is decided by the coordinator when
/// it handles the event.
///
/// `cancel` consumes the handle, so a heartbeat is canceled at most once.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub(crate) fn start(period: Duration, events: mpsc::Sender<Event>) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if events.send(Event::Heartbeat).await.is_err() {
                    debug!("heartbeat consumer is gone, timer stopping");
                    break;
                }
            }
        });
        Self { task }
    }

    /// Stops the timer.
    pub(crate) fn cancel(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn first_beat_waits_one_period() {
        let (tx, mut rx) = mpsc::channel(4);
        let heartbeat = Heartbeat::start(Duration::from_millis(50), tx);

        // Nothing before the initial delay elapses.
        assert!(
            timeout(Duration::from_millis(20), rx.recv())
                .await
                .is_err()
        );
        let beat = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(beat, Ok(Some(Event::Heartbeat))));

        heartbeat.cancel();
    }

    #[tokio::test]
    async fn cancel_stops_the_beats() {
        let (tx, mut rx) = mpsc::channel(4);
        let heartbeat = Heartbeat::start(Duration::from_millis(10), tx);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());

        heartbeat.cancel();
        // Aborting the task drops its sender, so the channel drains to
        // closed instead of producing more beats.
        loop {
            match timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(Event::Heartbeat)) => continue,
                Ok(Some(other)) => panic!("unexpected event: {other:?}"),
                Ok(None) => break,
                Err(_) => panic!("timer still alive after cancel"),
            }
        }
    }
}
