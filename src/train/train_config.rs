use std::sync::mpsc;
use std::sync::{atomic::AtomicBool, Arc};

use serde::{Deserialize, Serialize};

use crate::train::epoch_stats::TrainEvent;

/// Configuration for a `train_loop` run.
///
/// # Fields
/// - `epochs`                : full passes over the trainable pool; `None`
///                             trains until the stop flag is set or the
///                             progress receiver is dropped
/// - `save_interval`         : steps between checkpoints (`0` = only at the end)
/// - `test_interval`         : steps between evaluations (`0` = only at the end)
/// - `use_flip_augmentation` : mirror samples along their width axis
/// - `flip_probability`      : per-sample chance of a mirror when enabled
/// - `augmentation_seed`     : fixes the flip draws; `None` uses fresh entropy
/// - `parallel_save`         : save each stage on its own thread; joined at the next checkpoint
/// - `progress_tx`           : optional channel receiving `TrainEvent`s. If the
///                             receiver is dropped the loop terminates early.
/// - `stop_flag`             : optional atomic flag; when set from another
///                             thread the loop stops before the next batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: Option<usize>,
    pub save_interval: usize,
    pub test_interval: usize,
    pub use_flip_augmentation: bool,
    pub flip_probability: f64,
    pub augmentation_seed: Option<u64>,
    pub parallel_save: bool,
    #[serde(skip)]
    pub progress_tx: Option<mpsc::Sender<TrainEvent>>,
    #[serde(skip)]
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: None,
            save_interval: 5,
            test_interval: 10,
            use_flip_augmentation: false,
            flip_probability: 0.5,
            augmentation_seed: None,
            parallel_save: true,
            progress_tx: None,
            stop_flag: None,
        }
    }
}

impl TrainConfig {
    /// Creates a bounded run with no progress channel and no stop flag.
    pub fn new(epochs: usize, save_interval: usize, test_interval: usize) -> Self {
        TrainConfig {
            epochs: Some(epochs),
            save_interval,
            test_interval,
            ..Default::default()
        }
    }
}
