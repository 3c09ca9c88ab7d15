//! Numeric core of the training cluster: batch materialization, the
//! feedforward network behind the shared model snapshots, and the engine
//! trait the coordination layer dispatches compute through.

pub mod batch;
pub mod engine;
pub mod error;
pub mod network;

pub use batch::Batch;
pub use engine::{ComputeEngine, FeedForwardEngine};
pub use error::{MlError, Result};
pub use network::{Network, PretrainParams};
