use std::collections::HashSet;
use std::fmt;

use tracing::info;

use crate::cache::CacheStore;
use crate::error::{PipelineError, Result};
use crate::graph::naming::NameContext;
use crate::graph::spec::GraphSpec;
use crate::graph::stage::{Parameter, Stage, StageKind};
use crate::source::DataSource;
use crate::stats::Statistics;

/// A linear chain of stages, input first.
///
/// Each stage refers to its predecessor by index into `stages`. The graph
/// owns the parameters and persists them through `cache`; the arithmetic
/// that updates them lives behind [`Learner`](crate::train::Learner).
pub struct StageGraph {
    pub(crate) name: String,
    pub(crate) stages: Vec<Stage>,
    pub(crate) cache: CacheStore,
}

impl StageGraph {
    /// Builds every stage of `spec`, computing normalization statistics from
    /// `source` and then loading whatever parameters `cache` already holds.
    pub fn build<S: DataSource + ?Sized>(
        spec: &GraphSpec,
        source: &S,
        cache: CacheStore,
        names: &mut NameContext,
    ) -> Result<StageGraph> {
        spec.validate()?;
        let name = names.create("network", spec.name.as_deref());

        let mut stages: Vec<Stage> = Vec::with_capacity(spec.stages.len());
        let mut seen = HashSet::new();
        for stage_spec in &spec.stages {
            let kind = &stage_spec.kind;
            let stage_name = names.create(kind.kind_name(), stage_spec.name.as_deref());
            if !seen.insert(stage_name.clone()) {
                return Err(PipelineError::config(format!(
                    "stage name '{stage_name}' is used twice"
                )));
            }

            let predecessor = stages.len().checked_sub(1);
            let input_shape = match predecessor {
                Some(p) => stages[p].shape.clone(),
                None => source.image_shape().to_vec(),
            };
            if let StageKind::Softmax { classes } = kind {
                if *classes != source.num_classes() {
                    return Err(PipelineError::config(format!(
                        "softmax stage '{stage_name}' has {classes} classes, source has {}",
                        source.num_classes()
                    )));
                }
            }

            let shape = kind.output_shape(&input_shape)?;
            let params = kind.init_parameters(&input_shape);
            let statistics = match kind {
                StageKind::Normalization => Some(Statistics::compute(source, &cache, &stage_name)?),
                _ => None,
            };

            stages.push(Stage {
                name: stage_name,
                kind: kind.clone(),
                shape,
                params,
                predecessor,
                regularization: stage_spec
                    .regularization
                    .unwrap_or(spec.defaults.regularization),
                learning_rate: stage_spec.learning_rate.unwrap_or(spec.defaults.learning_rate),
                statistics,
            });
        }

        let mut graph = StageGraph { name, stages, cache };
        for line in graph.to_string().lines() {
            info!("{line}");
        }
        graph.load()?;
        Ok(graph)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn stage_mut(&mut self, index: usize) -> Option<&mut Stage> {
        self.stages.get_mut(index)
    }

    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn input_shape(&self) -> &[usize] {
        self.stages.first().map(|s| s.shape.as_slice()).unwrap_or(&[])
    }

    pub fn output_shape(&self) -> &[usize] {
        self.stages.last().map(|s| s.shape.as_slice()).unwrap_or(&[])
    }

    /// Every parameter from the input up to and including `stage`, input side
    /// first. Empty when `stage` is out of range.
    pub fn cumulative_parameters(&self, stage: usize) -> Vec<&Parameter> {
        let mut chain = Vec::new();
        let mut cursor = self.stages.get(stage).map(|_| stage);
        while let Some(index) = cursor {
            chain.push(index);
            cursor = self.stages[index].predecessor;
        }
        chain
            .into_iter()
            .rev()
            .flat_map(|index| self.stages[index].params.iter())
            .collect()
    }

    /// All parameters of the graph.
    pub fn parameters(&self) -> Vec<&Parameter> {
        match self.stages.len() {
            0 => Vec::new(),
            n => self.cumulative_parameters(n - 1),
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.stages.iter().map(Stage::num_parameters).sum()
    }
}

impl fmt::Display for StageGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stage graph {} {{", self.name)?;
        for stage in &self.stages {
            writeln!(
                f,
                "  '{}'\toutput shape {:?}\tnparams {}\t{}",
                stage.name,
                stage.shape,
                stage.num_parameters(),
                stage.kind.label()
            )?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::spec::StageSpec;
    use crate::graph::stage::Activation;
    use crate::math::array::Array;
    use crate::source::MemorySource;

    fn source() -> MemorySource {
        let n = 12;
        let pixels = Array::from_vec(
            vec![n, 1, 4, 4],
            (0..n * 16).map(|x| (x % 7) as f64).collect(),
        )
        .unwrap();
        MemorySource::new(pixels, (0..n).map(|i| i % 2).collect(), 2, 4, 4).unwrap()
    }

    fn spec() -> GraphSpec {
        GraphSpec::new(None)
            .stage(StageKind::Normalization)
            .stage(StageKind::Convolution { filter: (3, 3), filters: 2, activation: Activation::Tanh })
            .stage(StageKind::MaxPool { patch: (2, 2) })
            .stage_spec(StageSpec::new(StageKind::Softmax { classes: 2 }).with_learning_rate(0.5))
    }

    #[test]
    fn build_derives_names_shapes_and_defaults() {
        let graph =
            StageGraph::build(&spec(), &source(), CacheStore::disabled(), &mut NameContext::new())
                .unwrap();
        let names: Vec<&str> = graph.stages().iter().map(Stage::name).collect();
        assert_eq!(names, ["input-1", "normalize-1", "conv-1", "pool-1", "softmax-1"]);
        assert_eq!(graph.name(), "network-1");
        assert_eq!(graph.input_shape(), &[1, 4, 4]);
        assert_eq!(graph.stages()[2].shape(), &[2, 2, 2]);
        assert_eq!(graph.stage_by_name("pool-1").map(Stage::shape), Some(&[2, 1, 1][..]));
        assert!(graph.stage_by_name("pool-2").is_none());
        assert_eq!(graph.stage(1).map(Stage::name), Some("normalize-1"));
        assert!(graph.stage(5).is_none());
        assert_eq!(graph.output_shape(), &[2]);

        assert_eq!(graph.stages()[2].learning_rate(), 0.1);
        assert_eq!(graph.stages()[4].learning_rate(), 0.5);
        assert!(graph.stages()[1].statistics().is_some());
        assert_eq!(graph.stages()[1].statistics().unwrap().count(), 8.0);
    }

    #[test]
    fn cumulative_parameters_walk_back_to_the_input() {
        let graph =
            StageGraph::build(&spec(), &source(), CacheStore::disabled(), &mut NameContext::new())
                .unwrap();
        assert!(graph.cumulative_parameters(1).is_empty());
        let conv: Vec<&str> = graph.cumulative_parameters(3).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(conv, ["W", "B"]);
        let all = graph.cumulative_parameters(4);
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].value.shape(), &[2, 1, 3, 3]);
        assert_eq!(all[2].value.shape(), &[2, 2]);
        assert!(graph.cumulative_parameters(9).is_empty());
    }

    #[test]
    fn malformed_graphs_fail_at_build() {
        let bad_pool = GraphSpec::new(None).stage(StageKind::MaxPool { patch: (3, 3) });
        let err =
            StageGraph::build(&bad_pool, &source(), CacheStore::disabled(), &mut NameContext::new());
        assert!(matches!(err, Err(PipelineError::Config(_))));

        let wrong_classes = GraphSpec::new(None).stage(StageKind::Softmax { classes: 3 });
        let err = StageGraph::build(
            &wrong_classes,
            &source(),
            CacheStore::disabled(),
            &mut NameContext::new(),
        );
        assert!(matches!(err, Err(PipelineError::Config(_))));

        let duplicate = GraphSpec::new(None)
            .stage_spec(StageSpec::new(StageKind::Normalization).named("x"))
            .stage_spec(StageSpec::new(StageKind::Normalization).named("x"));
        let err =
            StageGraph::build(&duplicate, &source(), CacheStore::disabled(), &mut NameContext::new());
        assert!(matches!(err, Err(PipelineError::Config(_))));
    }

    #[test]
    fn summary_lists_every_stage() {
        let graph =
            StageGraph::build(&spec(), &source(), CacheStore::disabled(), &mut NameContext::new())
                .unwrap();
        let summary = graph.to_string();
        assert!(summary.starts_with("Stage graph network-1 {"));
        assert!(summary.contains("'conv-1'\toutput shape [2, 2, 2]\tnparams 20\tConvolution"));
        assert_eq!(summary.lines().count(), graph.stages().len() + 2);
    }
}
