use serde::{Deserialize, Serialize};

/// Coarse phase of a `train_loop` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    Idle,
    Training,
    Checkpointing,
    Evaluating,
}

/// Per-epoch training statistics emitted by `train_loop`.
///
/// Sent at the end of every completed epoch when a `progress_tx` channel is
/// configured in `TrainConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Total epochs requested; `None` for an unbounded run.
    pub total_epochs: Option<usize>,
    /// Global step count after this epoch.
    pub steps: usize,
    /// Mean of the costs the learner reported for this epoch's batches.
    pub mean_cost: f64,
    /// Wall-clock duration of this single epoch in milliseconds.
    pub elapsed_ms: u64,
}

/// Result of one pass over the held-out set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub step: usize,
    /// True size of the held-out set; padding beyond it is ignored.
    pub held_out: usize,
    pub correct: usize,
    /// `correct / held_out`, in [0, 1].
    pub accuracy: f64,
    pub unique_predicted_classes: usize,
    /// First ten `(predicted, actual)` pairs.
    pub samples: Vec<(usize, usize)>,
}

/// Everything a `train_loop` run reports through its progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainEvent {
    State { state: TrainingState },
    Epoch(EpochStats),
    Checkpoint { step: usize },
    Evaluation(Evaluation),
}
