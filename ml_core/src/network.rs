use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use comms::msg::{LayerState, ModelSnapshot};

use crate::{Batch, MlError, Result};

/// One dense layer. `weights` is `inputs` x `outputs`, `bias` is `outputs`.
#[derive(Debug, Clone, PartialEq)]
struct Dense {
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl Dense {
    fn forward(&self, inputs: &Array2<f32>) -> Array2<f32> {
        (inputs.dot(&self.weights) + &self.bias).mapv(sigmoid)
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

/// A feedforward sigmoid network materialized from a wire snapshot.
///
/// `layers` is never empty; both constructors enforce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    layers: Vec<Dense>,
}

impl Network {
    /// Validates `snapshot` and loads it into dense matrices.
    ///
    /// # Errors
    /// `MlError::InvalidInput` for an empty snapshot,
    /// `MlError::ShapeMismatch` when a layer's buffers disagree with its
    /// declared widths or adjacent layers do not chain.
    pub fn from_snapshot(snapshot: &ModelSnapshot) -> Result<Self> {
        if snapshot.layers.is_empty() {
            return Err(MlError::InvalidInput("snapshot has no layers"));
        }

        let mut layers = Vec::with_capacity(snapshot.layers.len());
        let mut prev_outputs: Option<usize> = None;
        for layer in &snapshot.layers {
            if layer.weights.len() != layer.inputs * layer.outputs {
                return Err(MlError::ShapeMismatch {
                    what: "layer weights",
                    got: layer.weights.len(),
                    expected: layer.inputs * layer.outputs,
                });
            }
            if layer.bias.len() != layer.outputs {
                return Err(MlError::ShapeMismatch {
                    what: "layer bias",
                    got: layer.bias.len(),
                    expected: layer.outputs,
                });
            }
            if let Some(prev) = prev_outputs {
                if layer.inputs != prev {
                    return Err(MlError::ShapeMismatch {
                        what: "layer fan-in",
                        got: layer.inputs,
                        expected: prev,
                    });
                }
            }
            prev_outputs = Some(layer.outputs);

            let weights =
                Array2::from_shape_vec((layer.inputs, layer.outputs), layer.weights.clone())
                    .map_err(|_| MlError::InvalidInput("layer weights are not rectangular"))?;
            layers.push(Dense {
                weights,
                bias: Array1::from_vec(layer.bias.clone()),
            });
        }
        Ok(Self { layers })
    }

    /// Exports the current weights as a wire snapshot.
    pub fn snapshot(&self) -> ModelSnapshot {
        let layers = self
            .layers
            .iter()
            .map(|layer| LayerState {
                inputs: layer.weights.nrows(),
                outputs: layer.weights.ncols(),
                weights: layer.weights.iter().copied().collect(),
                bias: layer.bias.to_vec(),
            })
            .collect();
        ModelSnapshot { layers }
    }

    /// A fresh network with the given layer widths, weights drawn from a
    /// normal scaled by fan-in, biases at zero.
    ///
    /// # Args
    /// * `dims` - Layer widths from input to output; at least two entries.
    /// * `rng` - Source for the initial weights.
    pub fn random<R: Rng + ?Sized>(dims: &[usize], rng: &mut R) -> Result<Self> {
        if dims.len() < 2 {
            return Err(MlError::InvalidInput(
                "a network needs an input and an output width",
            ));
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(MlError::InvalidInput("layer widths must be non-zero"));
        }

        let mut layers = Vec::with_capacity(dims.len() - 1);
        for pair in dims.windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let std_dev = (1.0 / fan_in as f32).sqrt();
            let normal = Normal::new(0.0, std_dev)
                .map_err(|_| MlError::InvalidInput("weight scale is not finite"))?;
            layers.push(Dense {
                weights: Array2::from_shape_fn((fan_in, fan_out), |_| normal.sample(rng)),
                bias: Array1::zeros(fan_out),
            });
        }
        Ok(Self { layers })
    }

    /// Activations of every layer for `inputs`, first layer first.
    fn activations(&self, inputs: &Array2<f32>) -> Result<Vec<Array2<f32>>> {
        let mut acts = Vec::with_capacity(self.layers.len());
        let mut current = inputs.clone();
        for layer in &self.layers {
            if current.ncols() != layer.weights.nrows() {
                return Err(MlError::ShapeMismatch {
                    what: "layer input",
                    got: current.ncols(),
                    expected: layer.weights.nrows(),
                });
            }
            current = layer.forward(&current);
            acts.push(current.clone());
        }
        Ok(acts)
    }

    /// Full forward pass.
    pub fn forward(&self, inputs: &Array2<f32>) -> Result<Array2<f32>> {
        let mut acts = self.activations(inputs)?;
        acts.pop()
            .ok_or(MlError::InvalidInput("network has no layers"))
    }

    /// Mean squared error of the forward pass against the batch targets.
    pub fn mse(&self, batch: &Batch) -> Result<f32> {
        let output = self.forward(batch.inputs())?;
        if output.ncols() != batch.targets().ncols() {
            return Err(MlError::ShapeMismatch {
                what: "batch target",
                got: batch.targets().ncols(),
                expected: output.ncols(),
            });
        }
        let diff = &output - batch.targets();
        Ok(diff.mapv(|d| d * d).mean().unwrap_or(0.0))
    }

    /// Supervised training: full-batch gradient descent on the squared
    /// error, one backward pass per epoch.
    ///
    /// # Args
    /// * `batch` - Inputs and targets, stacked row-wise.
    /// * `learning_rate` - Step size applied to every layer.
    /// * `epochs` - Number of passes over the batch.
    pub fn finetune(&mut self, batch: &Batch, learning_rate: f32, epochs: usize) -> Result<()> {
        let rows = batch.rows() as f32;
        for _ in 0..epochs {
            let acts = self.activations(batch.inputs())?;
            let output = acts
                .last()
                .ok_or(MlError::InvalidInput("network has no layers"))?;
            if output.ncols() != batch.targets().ncols() {
                return Err(MlError::ShapeMismatch {
                    what: "batch target",
                    got: batch.targets().ncols(),
                    expected: output.ncols(),
                });
            }

            let mut delta = (output - batch.targets()) * &output.mapv(|a| a * (1.0 - a));
            for l in (0..self.layers.len()).rev() {
                let upstream = if l == 0 { batch.inputs() } else { &acts[l - 1] };
                let grad_w = upstream.t().dot(&delta) / rows;
                let grad_b = delta.sum_axis(Axis(0)) / rows;

                // Propagate through the pre-update weights.
                if l > 0 {
                    let hidden = &acts[l - 1];
                    delta = delta.dot(&self.layers[l].weights.t())
                        * &hidden.mapv(|a| a * (1.0 - a));
                }

                let layer = &mut self.layers[l];
                layer.weights = &layer.weights - &(grad_w * learning_rate);
                layer.bias = &layer.bias - &(grad_b * learning_rate);
            }
        }
        Ok(())
    }

    /// Unsupervised layerwise pretraining: each layer is trained as a
    /// tied-weight denoising autoencoder on the activations of the layer
    /// below, then the clean signal advances through it.
    ///
    /// # Args
    /// * `inputs` - The batch inputs; targets are ignored here.
    /// * `params` - Step size, epochs per layer and corruption level.
    /// * `rng` - Source for the input corruption mask.
    pub fn pretrain<R: Rng + ?Sized>(
        &mut self,
        inputs: &Array2<f32>,
        params: &PretrainParams,
        rng: &mut R,
    ) -> Result<()> {
        let mut clean = inputs.clone();
        for l in 0..self.layers.len() {
            if clean.ncols() != self.layers[l].weights.nrows() {
                return Err(MlError::ShapeMismatch {
                    what: "layer input",
                    got: clean.ncols(),
                    expected: self.layers[l].weights.nrows(),
                });
            }
            let rows = clean.nrows() as f32;

            for _ in 0..params.epochs {
                let corrupted = clean.mapv(|v| {
                    if rng.random::<f32>() < params.corruption {
                        0.0
                    } else {
                        v
                    }
                });

                let layer = &self.layers[l];
                let hidden = (corrupted.dot(&layer.weights) + &layer.bias).mapv(sigmoid);
                let recon = hidden.dot(&layer.weights.t()).mapv(sigmoid);

                let delta_recon = (&recon - &clean) * &recon.mapv(|a| a * (1.0 - a));
                let delta_hidden =
                    delta_recon.dot(&layer.weights) * &hidden.mapv(|a| a * (1.0 - a));
                let grad_w =
                    (corrupted.t().dot(&delta_hidden) + delta_recon.t().dot(&hidden)) / rows;
                let grad_b = delta_hidden.sum_axis(Axis(0)) / rows;

                let layer = &mut self.layers[l];
                layer.weights = &layer.weights - &(grad_w * params.learning_rate);
                layer.bias = &layer.bias - &(grad_b * params.learning_rate);
            }

            clean = self.layers[l].forward(&clean);
        }
        Ok(())
    }
}

/// Hyperparameters of the pretraining step. These ride along in the worker
/// configuration rather than in each job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PretrainParams {
    pub learning_rate: f32,
    /// Passes per layer.
    pub epochs: usize,
    /// Probability of zeroing an input during denoising.
    pub corruption: f32,
}

impl Default for PretrainParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 10,
            corruption: 0.3,
        }
    }
}
