//! Messaging layer for the training cluster: the message contracts shared
//! by master and workers, the topic namespace, and an in-process
//! publish/subscribe mediator that routes between them.

pub mod mediator;
pub mod msg;
pub mod topic;

pub use mediator::{BusError, Delivery, Mediator, SubscriptionId};
pub use topic::Topic;
