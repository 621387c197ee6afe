use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::graph::{SaveHandle, StageGraph};
use crate::loader::Batch;
use crate::source::DataSource;
use crate::train::epoch_stats::{EpochStats, Evaluation, TrainEvent, TrainingState};
use crate::train::learner::Learner;
use crate::train::train_config::TrainConfig;

/// Number of `(predicted, actual)` pairs kept in an [`Evaluation`].
const EVALUATION_SAMPLES: usize = 10;

/// What a finished `train_loop` run hands back.
#[derive(Debug)]
pub struct TrainReport {
    pub steps: usize,
    /// Fully completed epochs.
    pub epochs: usize,
    /// True if the stop flag or a dropped receiver ended the run.
    pub stopped_early: bool,
    /// The evaluation run after the last step.
    pub last_evaluation: Evaluation,
    /// Writers of the final checkpoint; wait on it before exiting.
    pub final_save: SaveHandle,
}

/// Trains `graph` on every batch of `source` for `config.epochs` epochs.
///
/// Every `save_interval` steps the graph is checkpointed and every
/// `test_interval` steps it is evaluated against the held-out set. One more
/// checkpoint and one more evaluation always run after the last step, also
/// when the run was stopped early.
///
/// With `parallel_save`, a checkpoint's writers are joined before the next
/// checkpoint starts, so at most one save is in flight and an earlier one
/// never lands after a later one. Only the final save is left to the caller.
///
/// # Early termination
/// The loop stops before the next batch if:
/// - the `progress_tx` receiver has been dropped, **or**
/// - `config.stop_flag` is set to `true`.
///
/// # Errors
/// `Config` for a source without trainable batches, a flip probability
/// outside [0, 1], or an unbounded run nothing can stop. Any error from the
/// source, the learner or the cache aborts the run, including a failed
/// intermediate checkpoint.
pub fn train_loop<S, L>(
    graph: &mut StageGraph,
    source: &S,
    learner: &mut L,
    config: &TrainConfig,
) -> Result<TrainReport>
where
    S: DataSource + ?Sized,
    L: Learner + ?Sized,
{
    let num_batches = source.num_batches();
    if num_batches == 0 {
        return Err(PipelineError::config("source has no trainable batches"));
    }
    if !(0.0..=1.0).contains(&config.flip_probability) {
        return Err(PipelineError::config(format!(
            "flip probability {} is outside [0, 1]",
            config.flip_probability
        )));
    }
    if config.epochs.is_none() && config.stop_flag.is_none() && config.progress_tx.is_none() {
        return Err(PipelineError::config(
            "unbounded training needs a stop flag or a progress channel",
        ));
    }

    let mut rng = match config.augmentation_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut progress = Progress::new(config.progress_tx.as_ref());
    let test_set = source.test_set()?;

    let mut step = 0;
    let mut completed_epochs = 0;
    let mut stopped_early = false;
    let mut pending = SaveHandle::default();

    'epochs: for epoch in 1.. {
        if config.epochs.map_or(false, |total| epoch > total) {
            break;
        }
        progress.state(TrainingState::Training);
        info!(epoch, "starting epoch");
        let t_start = Instant::now();
        let mut cost_sum = 0.0;

        for index in 0..num_batches {
            if progress.disconnected || stop_requested(config) {
                stopped_early = true;
                break 'epochs;
            }

            let mut batch = source.batch(index)?;
            if config.use_flip_augmentation {
                for row in 0..batch.len() {
                    if rng.gen_bool(config.flip_probability) {
                        batch.pixels.flip_row_last_axis(row);
                    }
                }
            }
            cost_sum += learner.learn(graph, &batch.pixels, &batch.encoded)?;
            step += 1;

            if config.save_interval > 0 && step % config.save_interval == 0 {
                std::mem::take(&mut pending).wait()?;
                pending = checkpoint(graph, config, step, &mut progress)?;
                progress.state(TrainingState::Training);
            }
            if config.test_interval > 0 && step % config.test_interval == 0 {
                evaluate(graph, learner, &test_set, step, &mut progress)?;
                progress.state(TrainingState::Training);
            }
        }

        completed_epochs = epoch;
        progress.send(TrainEvent::Epoch(EpochStats {
            epoch,
            total_epochs: config.epochs,
            steps: step,
            mean_cost: cost_sum / num_batches as f64,
            elapsed_ms: t_start.elapsed().as_millis() as u64,
        }));
    }

    if stopped_early {
        info!(step, "training stopped");
    }
    pending.wait()?;
    let final_save = checkpoint(graph, config, step, &mut progress)?;
    let last_evaluation = evaluate(graph, learner, &test_set, step, &mut progress)?;
    progress.state(TrainingState::Idle);

    Ok(TrainReport {
        steps: step,
        epochs: completed_epochs,
        stopped_early,
        last_evaluation,
        final_save,
    })
}

/// Progress channel wrapper that remembers when the receiver went away.
struct Progress<'a> {
    tx: Option<&'a mpsc::Sender<TrainEvent>>,
    disconnected: bool,
}

impl<'a> Progress<'a> {
    fn new(tx: Option<&'a mpsc::Sender<TrainEvent>>) -> Self {
        Progress { tx, disconnected: false }
    }

    fn send(&mut self, event: TrainEvent) {
        let Some(tx) = self.tx else { return };
        if self.disconnected {
            return;
        }
        if tx.send(event).is_err() {
            warn!("progress receiver dropped, stopping after this step");
            self.disconnected = true;
        }
    }

    fn state(&mut self, state: TrainingState) {
        self.send(TrainEvent::State { state });
    }
}

fn stop_requested(config: &TrainConfig) -> bool {
    config
        .stop_flag
        .as_ref()
        .map_or(false, |flag| flag.load(Ordering::Relaxed))
}

fn checkpoint(
    graph: &StageGraph,
    config: &TrainConfig,
    step: usize,
    progress: &mut Progress<'_>,
) -> Result<SaveHandle> {
    progress.state(TrainingState::Checkpointing);
    info!(step, "saving");
    let handle = graph.save(config.parallel_save)?;
    progress.send(TrainEvent::Checkpoint { step });
    Ok(handle)
}

fn evaluate<L: Learner + ?Sized>(
    graph: &StageGraph,
    learner: &mut L,
    (held_out, batch): &(usize, Batch),
    step: usize,
    progress: &mut Progress<'_>,
) -> Result<Evaluation> {
    progress.state(TrainingState::Evaluating);
    let held_out = *held_out;
    let predictions = learner.predict(graph, &batch.pixels)?;
    if predictions.len() < held_out {
        return Err(PipelineError::Engine(format!(
            "{} predictions for {held_out} held-out samples",
            predictions.len()
        )));
    }

    let pairs: Vec<(usize, usize)> = predictions[..held_out]
        .iter()
        .copied()
        .zip(batch.labels[..held_out].iter().copied())
        .collect();
    let correct = pairs.iter().filter(|(p, a)| p == a).count();
    let unique_predicted_classes = pairs.iter().map(|(p, _)| *p).collect::<HashSet<_>>().len();
    let evaluation = Evaluation {
        step,
        held_out,
        correct,
        accuracy: correct as f64 / held_out as f64,
        unique_predicted_classes,
        samples: pairs.into_iter().take(EVALUATION_SAMPLES).collect(),
    };

    info!(
        step,
        accuracy = %format!("{:.2}%", evaluation.accuracy * 100.0),
        correct,
        held_out,
        "evaluated"
    );
    info!(samples = ?evaluation.samples, "(predicted, actual)");
    info!(unique_predicted_classes, "distinct predicted classes");

    progress.send(TrainEvent::Evaluation(evaluation.clone()));
    Ok(evaluation)
}
