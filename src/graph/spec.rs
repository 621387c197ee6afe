use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::graph::stage::{Regularization, StageKind};

/// One entry of a [`GraphSpec`].
///
/// `name`, `regularization` and `learning_rate` are optional; absent values
/// fall back to a generated name and the graph-level defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub kind: StageKind,
    #[serde(default)]
    pub regularization: Option<Regularization>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
}

impl StageSpec {
    pub fn new(kind: StageKind) -> StageSpec {
        StageSpec { name: None, kind, regularization: None, learning_rate: None }
    }

    pub fn named(mut self, name: impl Into<String>) -> StageSpec {
        self.name = Some(name.into());
        self
    }

    pub fn regularized(mut self, l1: f64, l2: f64) -> StageSpec {
        self.regularization = Some(Regularization { l1, l2 });
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> StageSpec {
        self.learning_rate = Some(learning_rate);
        self
    }
}

/// Values a stage inherits when its spec leaves them unset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphDefaults {
    pub regularization: Regularization,
    pub learning_rate: f64,
}

impl Default for GraphDefaults {
    fn default() -> Self {
        GraphDefaults { regularization: Regularization::default(), learning_rate: 0.1 }
    }
}

/// A serializable description of a stage chain, kept apart from the trained
/// parameters so architectures can be stored before training starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub name: Option<String>,
    /// Ordered input to output; the first entry must be the only `Input`.
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub defaults: GraphDefaults,
}

impl GraphSpec {
    /// A spec holding only the input stage.
    pub fn new(name: Option<&str>) -> GraphSpec {
        GraphSpec {
            name: name.map(str::to_string),
            stages: vec![StageSpec::new(StageKind::Input)],
            defaults: GraphDefaults::default(),
        }
    }

    pub fn stage(mut self, kind: StageKind) -> GraphSpec {
        self.stages.push(StageSpec::new(kind));
        self
    }

    pub fn stage_spec(mut self, spec: StageSpec) -> GraphSpec {
        self.stages.push(spec);
        self
    }

    /// Checks the chain starts with exactly one input stage.
    pub fn validate(&self) -> Result<()> {
        match self.stages.first() {
            Some(StageSpec { kind: StageKind::Input, .. }) => {}
            Some(other) => {
                return Err(PipelineError::config(format!(
                    "graph must start with an input stage, found {}",
                    other.kind.label()
                )))
            }
            None => return Err(PipelineError::config("graph has no stages")),
        }
        let inputs = self.stages.iter().filter(|s| s.kind == StageKind::Input).count();
        if inputs > 1 {
            return Err(PipelineError::config(format!("graph has {inputs} input stages")));
        }
        Ok(())
    }

    /// Serializes the spec to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a `GraphSpec` from a JSON file.
    pub fn load_json(path: &str) -> Result<GraphSpec> {
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
