use ndarray::Array2;

use comms::msg::Sample;

use crate::{MlError, Result};

/// The locally materialized training set of one job: every sample stacked
/// row-wise into an input matrix and a target matrix.
///
/// A batch is rebuilt whole each time a job is accepted; it is never
/// patched in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    inputs: Array2<f32>,
    targets: Array2<f32>,
}

impl Batch {
    /// Stacks `samples` into the two batch matrices.
    ///
    /// # Args
    /// * `samples` - The job's ordered input/target pairs.
    ///
    /// # Errors
    /// `MlError::InvalidInput` when `samples` is empty or its input rows
    /// are, `MlError::ShapeMismatch` when a row disagrees with the first
    /// sample's widths.
    pub fn from_samples(samples: &[Sample]) -> Result<Self> {
        let Some(first) = samples.first() else {
            return Err(MlError::InvalidInput("job carries no samples"));
        };
        let in_width = first.input.len();
        let out_width = first.target.len();
        if in_width == 0 {
            return Err(MlError::InvalidInput("sample input row is empty"));
        }

        let mut inputs = Vec::with_capacity(samples.len() * in_width);
        let mut targets = Vec::with_capacity(samples.len() * out_width);
        for sample in samples {
            if sample.input.len() != in_width {
                return Err(MlError::ShapeMismatch {
                    what: "sample input",
                    got: sample.input.len(),
                    expected: in_width,
                });
            }
            if sample.target.len() != out_width {
                return Err(MlError::ShapeMismatch {
                    what: "sample target",
                    got: sample.target.len(),
                    expected: out_width,
                });
            }
            inputs.extend_from_slice(&sample.input);
            targets.extend_from_slice(&sample.target);
        }

        let rows = samples.len();
        let inputs = Array2::from_shape_vec((rows, in_width), inputs)
            .map_err(|_| MlError::InvalidInput("samples do not form a rectangular batch"))?;
        let targets = Array2::from_shape_vec((rows, out_width), targets)
            .map_err(|_| MlError::InvalidInput("targets do not form a rectangular batch"))?;
        Ok(Self { inputs, targets })
    }

    pub fn inputs(&self) -> &Array2<f32> {
        &self.inputs
    }

    pub fn targets(&self) -> &Array2<f32> {
        &self.targets
    }

    /// Number of samples.
    pub fn rows(&self) -> usize {
        self.inputs.nrows()
    }
}
