use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::math::array::Array;
use crate::stats::Statistics;

/// Point-wise non-linearity a stage asks the numeric engine to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Tanh,
    Sigmoid,
    Relu,
    Identity,
}

/// L1/L2 penalty weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Regularization {
    pub l1: f64,
    pub l2: f64,
}

/// What a stage does. The arithmetic belongs to the numeric engine; this
/// crate only derives shapes and owns the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageKind {
    /// Graph entry point; its shape is the source's image shape.
    Input,
    /// Shifts and scales by corpus statistics to zero mean, unit variance.
    Normalization,
    /// Valid-mode 2-D convolution over `[channels, height, width]`.
    Convolution {
        filter: (usize, usize),
        filters: usize,
        #[serde(default)]
        activation: Activation,
    },
    /// Non-overlapping max pooling; the patch must tile the input exactly.
    MaxPool { patch: (usize, usize) },
    FullyConnected {
        neurons: usize,
        #[serde(default)]
        activation: Activation,
        #[serde(default)]
        dropout: bool,
    },
    /// Fully connected stage with a softmax output over `classes`.
    Softmax { classes: usize },
}

impl StageKind {
    /// Prefix for generated stage names.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StageKind::Input => "input",
            StageKind::Normalization => "normalize",
            StageKind::Convolution { .. } => "conv",
            StageKind::MaxPool { .. } => "pool",
            StageKind::FullyConnected { .. } => "fcn",
            StageKind::Softmax { .. } => "softmax",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Input => "Input",
            StageKind::Normalization => "Normalization",
            StageKind::Convolution { .. } => "Convolution",
            StageKind::MaxPool { .. } => "MaxPool",
            StageKind::FullyConnected { .. } => "FullyConnected",
            StageKind::Softmax { .. } => "Softmax",
        }
    }

    /// Output shape given the predecessor's output shape.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match self {
            StageKind::Input | StageKind::Normalization => Ok(input.to_vec()),
            StageKind::Convolution { filter: (fh, fw), filters, .. } => {
                let (_, h, w) = image_dims(self, input)?;
                if *fh == 0 || *fw == 0 || *fh > h || *fw > w || *filters == 0 {
                    return Err(PipelineError::config(format!(
                        "convolution of image {h}x{w} with filter {fh}x{fw} ({filters} filters)"
                    )));
                }
                Ok(vec![*filters, h - fh + 1, w - fw + 1])
            }
            StageKind::MaxPool { patch: (ph, pw) } => {
                let (c, h, w) = image_dims(self, input)?;
                if *ph == 0 || *pw == 0 || h % ph != 0 || w % pw != 0 {
                    return Err(PipelineError::config(format!(
                        "max pooling of image {h}x{w}, but badly sized patch {ph}x{pw}"
                    )));
                }
                Ok(vec![c, h / ph, w / pw])
            }
            StageKind::FullyConnected { neurons, .. } => Ok(vec![*neurons]),
            StageKind::Softmax { classes } => Ok(vec![*classes]),
        }
    }

    /// Randomly initialized parameters for an input of shape `input`.
    pub fn init_parameters(&self, input: &[usize]) -> Vec<Parameter> {
        match self {
            StageKind::Convolution { filter: (fh, fw), filters, .. } => {
                let channels = input.first().copied().unwrap_or(1);
                let spread = 2.0 / (fh * fw) as f64;
                vec![
                    Parameter::new("W", Array::uniform(&[*filters, channels, *fh, *fw], spread)),
                    Parameter::new("B", Array::uniform(&[*filters], spread)),
                ]
            }
            StageKind::FullyConnected { neurons, .. } | StageKind::Softmax { classes: neurons } => {
                let fan_in: usize = input.iter().product();
                let spread = 2.0 / (1.5 * fan_in as f64).sqrt();
                vec![
                    Parameter::new("W", Array::uniform(&[*neurons, fan_in], spread)),
                    Parameter::new("B", Array::uniform(&[*neurons], spread)),
                ]
            }
            StageKind::Input | StageKind::Normalization | StageKind::MaxPool { .. } => Vec::new(),
        }
    }
}

fn image_dims(kind: &StageKind, input: &[usize]) -> Result<(usize, usize, usize)> {
    match input {
        [c, h, w] => Ok((*c, *h, *w)),
        _ => Err(PipelineError::config(format!(
            "{} stage needs a [channels, height, width] input, got {:?}",
            kind.label(),
            input
        ))),
    }
}

/// A named learnable array.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Array,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Array) -> Parameter {
        Parameter { name: name.into(), value }
    }
}

/// One built stage of a [`StageGraph`](crate::graph::StageGraph).
#[derive(Debug, Clone)]
pub struct Stage {
    pub(crate) name: String,
    pub(crate) kind: StageKind,
    pub(crate) shape: Vec<usize>,
    pub(crate) params: Vec<Parameter>,
    /// Index of the predecessor in the owning graph; `None` for the input.
    pub(crate) predecessor: Option<usize>,
    pub(crate) regularization: Regularization,
    pub(crate) learning_rate: f64,
    pub(crate) statistics: Option<Statistics>,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }

    pub fn predecessor(&self) -> Option<usize> {
        self.predecessor
    }

    pub fn regularization(&self) -> Regularization {
        self.regularization
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Corpus statistics of a normalization stage.
    pub fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    pub fn num_parameters(&self) -> usize {
        self.params.iter().map(|p| p.value.len()).sum()
    }
}
