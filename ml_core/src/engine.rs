use comms::msg::ModelSnapshot;

use crate::{Batch, Network, PretrainParams, Result};

/// The numeric step a worker runs on its assigned job.
///
/// The coordination layer treats implementations as a black box that maps
/// a model snapshot and a batch to an updated snapshot. Exactly one of the
/// two steps runs per job. Implementations are called from a blocking
/// thread and must carry no interior references to coordination state.
pub trait ComputeEngine: Send + Sync {
    /// Runs the unsupervised pretraining step over `batch`, updating
    /// `model` in place.
    fn pretrain(
        &self,
        model: &mut ModelSnapshot,
        batch: &Batch,
        params: &PretrainParams,
    ) -> Result<()>;

    /// Runs the supervised finetuning step over `batch`, updating `model`
    /// in place.
    fn finetune(
        &self,
        model: &mut ModelSnapshot,
        batch: &Batch,
        learning_rate: f32,
        epochs: usize,
    ) -> Result<()>;
}

/// [`ComputeEngine`] over this crate's feedforward sigmoid network.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedForwardEngine;

impl ComputeEngine for FeedForwardEngine {
    fn pretrain(
        &self,
        model: &mut ModelSnapshot,
        batch: &Batch,
        params: &PretrainParams,
    ) -> Result<()> {
        let mut network = Network::from_snapshot(model)?;
        let mut rng = rand::rng();
        network.pretrain(batch.inputs(), params, &mut rng)?;
        *model = network.snapshot();
        Ok(())
    }

    fn finetune(
        &self,
        model: &mut ModelSnapshot,
        batch: &Batch,
        learning_rate: f32,
        epochs: usize,
    ) -> Result<()> {
        let mut network = Network::from_snapshot(model)?;
        network.finetune(batch, learning_rate, epochs)?;
        *model = network.snapshot();
        Ok(())
    }
}
