use crate::error::Result;
use crate::graph::StageGraph;
use crate::math::array::Array;

/// The numeric engine that runs a [`StageGraph`].
///
/// `pixels` is `[batch_size] + image_shape`; `labels` is the one-hot
/// `[batch_size, num_classes]` encoding. Engine failures should be reported
/// as [`PipelineError::Engine`](crate::error::PipelineError::Engine).
pub trait Learner {
    /// One update step over a batch; returns its cost.
    fn learn(&mut self, graph: &mut StageGraph, pixels: &Array, labels: &Array) -> Result<f64>;

    /// Predicted class index for every row of `pixels`.
    fn predict(&mut self, graph: &StageGraph, pixels: &Array) -> Result<Vec<usize>>;
}
