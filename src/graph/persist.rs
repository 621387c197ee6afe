use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::error::{PipelineError, Result};
use crate::graph::graph::StageGraph;
use crate::graph::stage::Parameter;

/// Cache key of one stage parameter.
pub fn parameter_key(stage: &str, param: &str) -> String {
    format!("{stage}-{param}.weights")
}

/// Background saves started by [`StageGraph::save`].
///
/// Dropping the handle detaches the writer threads; call [`wait`](Self::wait)
/// when the checkpoint has to be on disk before moving on.
#[must_use = "dropping a SaveHandle detaches the writers; call wait() for durability"]
#[derive(Debug, Default)]
pub struct SaveHandle {
    writers: Vec<(String, JoinHandle<Result<()>>)>,
}

impl SaveHandle {
    /// Number of writer threads started for this save.
    pub fn pending(&self) -> usize {
        self.writers.len()
    }

    /// Joins every writer and returns the first failure.
    pub fn wait(self) -> Result<()> {
        let mut first_error = None;
        for (stage, writer) in self.writers {
            let outcome = writer
                .join()
                .map_err(|_| PipelineError::Worker(format!("save of stage '{stage}' panicked")))
                .and_then(|r| r);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl StageGraph {
    /// Writes every parameter to the graph's cache, output side first.
    ///
    /// With `parallel`, each parameter-owning stage is written by its own
    /// thread and the returned handle tracks them. Otherwise the writes happen
    /// before returning and the handle is empty.
    pub fn save(&self, parallel: bool) -> Result<SaveHandle> {
        let mut handle = SaveHandle::default();
        for stage in self.stages.iter().rev().filter(|s| !s.params.is_empty()) {
            if !parallel {
                save_stage(&self.cache, &stage.name, &stage.params)?;
                continue;
            }
            let cache = self.cache.clone();
            let name = stage.name.clone();
            let params = stage.params.clone();
            let writer = thread::Builder::new()
                .name(format!("save-{name}"))
                .spawn(move || save_stage(&cache, &name, &params))
                .map_err(|e| PipelineError::Worker(format!("cannot spawn save thread: {e}")))?;
            handle.writers.push((stage.name.clone(), writer));
        }
        Ok(handle)
    }

    /// Replaces parameters with their cached values, output side first.
    ///
    /// Missing entries keep their random initialization. A cached array of
    /// the wrong shape is an error.
    pub fn load(&mut self) -> Result<()> {
        let cache = self.cache.clone();
        for stage in self.stages.iter_mut().rev() {
            for param in &mut stage.params {
                let key = parameter_key(&stage.name, &param.name);
                if !cache.exists(&key) {
                    info!(stage = %stage.name, param = %param.name, "randomly initialized parameter");
                    continue;
                }
                let stored = cache.get_array(&key)?;
                if stored.shape() != param.value.shape() {
                    return Err(PipelineError::Shape(format!(
                        "cached '{key}' has shape {:?}, stage expects {:?}",
                        stored.shape(),
                        param.value.shape()
                    )));
                }
                param.value = stored;
                info!(stage = %stage.name, param = %param.name, "loaded parameter");
            }
        }
        Ok(())
    }
}

fn save_stage(cache: &CacheStore, stage: &str, params: &[Parameter]) -> Result<()> {
    for param in params {
        cache.put_array(&parameter_key(stage, &param.name), &param.value)?;
    }
    debug!(stage, "saved parameters");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::naming::NameContext;
    use crate::graph::spec::GraphSpec;
    use crate::graph::stage::{Activation, StageKind};
    use crate::math::array::Array;
    use crate::source::MemorySource;
    use tempfile::tempdir;

    fn source() -> MemorySource {
        let pixels = Array::from_vec(vec![6, 1, 2, 2], (0..24).map(|x| x as f64).collect()).unwrap();
        MemorySource::new(pixels, vec![0, 1, 0, 1, 0, 1], 2, 2, 2).unwrap()
    }

    fn spec() -> GraphSpec {
        GraphSpec::new(Some("tiny"))
            .stage(StageKind::FullyConnected { neurons: 3, activation: Activation::Tanh, dropout: false })
            .stage(StageKind::Softmax { classes: 2 })
    }

    fn build(cache: &CacheStore) -> StageGraph {
        StageGraph::build(&spec(), &source(), cache.clone(), &mut NameContext::new()).unwrap()
    }

    #[test]
    fn parallel_save_then_load_restores_parameters() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let graph = build(&cache);

        let handle = graph.save(true).unwrap();
        assert_eq!(handle.pending(), 2);
        handle.wait().unwrap();
        assert!(cache.exists("fcn-1-W.weights"));
        assert!(cache.exists("softmax-1-B.weights"));

        let restored = build(&cache);
        assert_eq!(graph.parameters(), restored.parameters());
    }

    #[test]
    fn sequential_save_is_done_on_return() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let graph = build(&cache);
        let handle = graph.save(false).unwrap();
        assert_eq!(handle.pending(), 0);
        drop(handle);
        assert_eq!(
            cache.get_array("fcn-1-W.weights").unwrap(),
            graph.stages()[1].params()[0].value
        );
    }

    #[test]
    fn wrong_shape_on_load_is_an_error() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        cache.put_array("fcn-1-W.weights", &Array::zeros(&[5, 5])).unwrap();
        let err = StageGraph::build(&spec(), &source(), cache, &mut NameContext::new());
        assert!(matches!(err, Err(PipelineError::Shape(_))));
    }

    #[test]
    fn missing_entries_keep_random_init() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let graph = build(&cache);
        assert_eq!(graph.stages()[1].params()[0].value.shape(), &[3, 4]);
        assert!(!cache.exists("fcn-1-W.weights"));
    }
}
