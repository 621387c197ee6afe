use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::loader::LoadMethod;
use crate::train::train_config::TrainConfig;

/// Shuffle seed used when a config does not name one.
pub const DEFAULT_SHUFFLE_SEED: u64 = 250;

/// Where the corpus lives and how it is partitioned and loaded.
///
/// Class labels follow the order of `subdirectories` (or of the sorted child
/// directories of `directory` when no explicit list is given), after removing
/// anything named in `exclude`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub directory: PathBuf,
    pub subdirectories: Option<Vec<String>>,
    pub exclude: Vec<String>,
    /// `None` trains on the whole pool as a single batch.
    pub batch_size: Option<usize>,
    /// Clamped to `batch_size` when larger.
    pub test_set_size: Option<usize>,
    pub load_method: LoadMethod,
    /// Queue capacity of the async loader.
    pub max_batches_preload: usize,
    pub balance_classes: bool,
    /// Balancing target; defaults to the size of the largest class.
    pub samples_per_class: Option<usize>,
    /// `None` disables on-disk caching.
    pub cache_dir: Option<PathBuf>,
    /// `None` shuffles with fresh entropy.
    pub shuffle_seed: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            directory: PathBuf::from("."),
            subdirectories: None,
            exclude: Vec::new(),
            batch_size: None,
            test_set_size: None,
            load_method: LoadMethod::Preload,
            max_batches_preload: 3,
            balance_classes: false,
            samples_per_class: None,
            cache_dir: None,
            shuffle_seed: Some(DEFAULT_SHUFFLE_SEED),
        }
    }
}

impl SourceConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        SourceConfig { directory: directory.into(), ..Default::default() }
    }
}

/// Everything a training run reads from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub training: TrainConfig,
    /// Checkpoint directory for stage parameters.
    pub weights_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Serializes the config to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a config; absent fields take their defaults.
    pub fn load_json(path: &str) -> Result<PipelineConfig> {
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
