use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::event::{Event, PollKind};

/// A wait loop for a missing job or model.
///
/// The loop holds no worker state and publishes nothing itself: it wakes
/// on a fixed backoff and asks the coordinator, through the event channel,
/// to re-check. The first tick fires immediately so the first request goes
/// out without waiting a whole backoff. The coordinator stops the loop as
/// soon as the awaited resource is present.
#[derive(Debug)]
pub(crate) struct PollLoop {
    task: JoinHandle<()>,
}

impl PollLoop {
    pub(crate) fn start(kind: PollKind, backoff: Duration, events: mpsc::Sender<Event>) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = time::interval(backoff);
            loop {
                ticker.tick().await;
                if events.send(Event::Poll(kind)).await.is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    /// Stops the loop.
    pub(crate) fn stop(self) {
        self.task.abort();
    }
}
