use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named destination on the bus.
///
/// Topics are flat strings. The mediator routes every published message to
/// the subscribers registered under exactly that string; there is no
/// hierarchy or pattern matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(Cow<'static, str>);

/// Topic the master listens on. All worker-originated traffic goes here.
pub const MASTER: Topic = Topic(Cow::Borrowed("master"));

/// Topic the master broadcasts model snapshots on. Every worker subscribes.
pub const BROADCAST: Topic = Topic(Cow::Borrowed("broadcast"));

/// Topic where subscription acks are re-published for cluster listeners.
pub const TOPICS: Topic = Topic(Cow::Borrowed("topics"));

impl Topic {
    /// The point-to-point topic of a single worker.
    pub fn worker(worker_id: usize) -> Self {
        Topic(Cow::Owned(format!("worker/{worker_id}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_topics_are_distinct_per_id() {
        assert_ne!(Topic::worker(0), Topic::worker(1));
        assert_eq!(Topic::worker(3).as_str(), "worker/3");
    }

    #[test]
    fn well_known_topics_do_not_collide() {
        assert_ne!(MASTER, BROADCAST);
        assert_ne!(MASTER, TOPICS);
        assert_ne!(BROADCAST, TOPICS);
    }
}
