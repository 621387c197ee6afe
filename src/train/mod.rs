pub mod epoch_stats;
pub mod learner;
pub mod loop_fn;
pub mod train_config;

pub use epoch_stats::{EpochStats, Evaluation, TrainEvent, TrainingState};
pub use learner::Learner;
pub use loop_fn::{train_loop, TrainReport};
pub use train_config::TrainConfig;
