use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::msg::Message;
use crate::topic::Topic;

/// A message as seen by a subscriber: the payload plus the topic it was
/// published on.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: Topic,
    pub message: Message,
}

/// Identifies one subscription so it can be dropped later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Errors reported by bus handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The registry task is gone; no further traffic is possible.
    Closed,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Closed => write!(f, "message bus is closed"),
        }
    }
}

impl std::error::Error for BusError {}

enum Command {
    Subscribe {
        topic: Topic,
        id: SubscriptionId,
        mailbox: mpsc::Sender<Delivery>,
    },
    Unsubscribe {
        topic: Topic,
        id: SubscriptionId,
    },
    Publish {
        topic: Topic,
        message: Message,
    },
}

struct Subscriber {
    id: SubscriptionId,
    mailbox: mpsc::Sender<Delivery>,
}

/// Location-transparent publish/subscribe mediator.
///
/// A single registry task owns the topic table; handles are cheap clones
/// that feed it commands over a channel, so registration and publication
/// never race. Delivery is at-most-once per subscriber: a full or closed
/// mailbox drops the message for that subscriber only and never blocks
/// the registry. Messages published to one topic stay ordered relative to
/// each other; nothing is guaranteed across topics.
#[derive(Debug, Clone)]
pub struct Mediator {
    commands: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
}

impl Mediator {
    const COMMAND_DEPTH: usize = 256;

    /// Starts the registry task on the current runtime and returns a
    /// handle to it.
    pub fn spawn() -> Self {
        let (commands, inbox) = mpsc::channel(Self::COMMAND_DEPTH);
        tokio::spawn(run_registry(inbox));
        Self {
            commands,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers `mailbox` for every message published on `topic`.
    ///
    /// A `SubscribeAck` is delivered through the mailbox once the
    /// registration is live; traffic published after the ack is observed
    /// by this subscriber.
    ///
    /// # Arguments
    /// * `topic` - The topic to listen on.
    /// * `mailbox` - Where deliveries for this subscription go.
    ///
    /// # Errors
    /// `BusError::Closed` if the registry task is gone.
    pub async fn subscribe(
        &self,
        topic: Topic,
        mailbox: mpsc::Sender<Delivery>,
    ) -> Result<SubscriptionId, BusError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.send(Command::Subscribe { topic, id, mailbox }).await?;
        Ok(id)
    }

    /// Removes one subscription.
    ///
    /// An `UnsubscribeAck` is delivered if the mailbox still accepts
    /// messages. Unknown ids are ignored.
    pub async fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> Result<(), BusError> {
        self.send(Command::Unsubscribe { topic, id }).await
    }

    /// Publishes `message` to the current subscribers of `topic`.
    ///
    /// Completion means the registry accepted the message, not that any
    /// subscriber received it; a topic with no subscribers swallows the
    /// message silently.
    pub async fn publish(&self, topic: Topic, message: Message) -> Result<(), BusError> {
        self.send(Command::Publish { topic, message }).await
    }

    async fn send(&self, command: Command) -> Result<(), BusError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BusError::Closed)
    }
}

async fn run_registry(mut commands: mpsc::Receiver<Command>) {
    let mut topics: HashMap<Topic, Vec<Subscriber>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Subscribe { topic, id, mailbox } => {
                let ack = Delivery {
                    topic: topic.clone(),
                    message: Message::SubscribeAck {
                        topic: topic.clone(),
                    },
                };
                if mailbox.try_send(ack).is_err() {
                    warn!("subscriber on {topic} could not take its subscribe ack");
                }
                topics.entry(topic).or_default().push(Subscriber { id, mailbox });
            }
            Command::Unsubscribe { topic, id } => {
                let Some(subs) = topics.get_mut(&topic) else {
                    continue;
                };
                if let Some(pos) = subs.iter().position(|sub| sub.id == id) {
                    let sub = subs.remove(pos);
                    let ack = Delivery {
                        topic: topic.clone(),
                        message: Message::UnsubscribeAck {
                            topic: topic.clone(),
                        },
                    };
                    let _ = sub.mailbox.try_send(ack);
                }
                if subs.is_empty() {
                    topics.remove(&topic);
                }
            }
            Command::Publish { topic, message } => {
                let Some(subs) = topics.get_mut(&topic) else {
                    trace!("no subscribers on {topic}, dropping {}", message.kind());
                    continue;
                };
                subs.retain(|sub| {
                    let delivery = Delivery {
                        topic: topic.clone(),
                        message: message.clone(),
                    };
                    match sub.mailbox.try_send(delivery) {
                        Ok(()) => true,
                        Err(TrySendError::Full(_)) => {
                            warn!(
                                "mailbox full on {topic}, dropping {} for one subscriber",
                                message.kind()
                            );
                            true
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!("subscriber on {topic} is gone, removing it");
                            false
                        }
                    }
                });
                if subs.is_empty() {
                    topics.remove(&topic);
                }
            }
        }
    }
}
