use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::error::{PipelineError, Result};
use crate::math::array::Array;
use crate::source::DataSource;

/// Single-pass Welford accumulator of per-feature mean and squared deviation.
#[derive(Debug, Clone)]
pub struct StreamingStats {
    shape: Vec<usize>,
    count: f64,
    mean: Vec<f64>,
    sum_sq_dev: Vec<f64>,
}

impl StreamingStats {
    pub fn new(shape: &[usize]) -> StreamingStats {
        let n = shape.iter().product();
        StreamingStats {
            shape: shape.to_vec(),
            count: 0.0,
            mean: vec![0.0; n],
            sum_sq_dev: vec![0.0; n],
        }
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn observe(&mut self, sample: &[f64]) -> Result<()> {
        if sample.len() != self.mean.len() {
            return Err(PipelineError::Shape(format!(
                "sample has {} features, statistics track {}",
                sample.len(),
                self.mean.len()
            )));
        }
        self.count += 1.0;
        let n = self.count;
        for ((m, s), &x) in self.mean.iter_mut().zip(self.sum_sq_dev.iter_mut()).zip(sample) {
            let delta = x - *m;
            *m += delta / n;
            *s += delta * (x - *m);
        }
        Ok(())
    }

    /// Feeds every row of a `[n] + shape` array.
    pub fn observe_rows(&mut self, rows: &Array) -> Result<()> {
        if rows.shape().get(1..) != Some(self.shape.as_slice()) {
            return Err(PipelineError::Shape(format!(
                "batch shape {:?} does not match sample shape {:?}",
                rows.shape(),
                self.shape
            )));
        }
        for i in 0..rows.rows() {
            self.observe(rows.row(i))?;
        }
        Ok(())
    }

    pub fn finish(self) -> Statistics {
        Statistics {
            mean: Array::from_vec(self.shape.clone(), self.mean).unwrap_or_default(),
            sum_sq_dev: Array::from_vec(self.shape, self.sum_sq_dev).unwrap_or_default(),
            count: self.count,
        }
    }
}

/// Per-feature statistics of a whole corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    mean: Array,
    sum_sq_dev: Array,
    count: f64,
}

impl Statistics {
    /// Loads statistics cached under `name`, or makes one pass over every
    /// trainable batch of `source` and caches the result.
    pub fn compute<S: DataSource + ?Sized>(
        source: &S,
        cache: &CacheStore,
        name: &str,
    ) -> Result<Statistics> {
        let (mean_key, variance_key, count_key) = keys(name);
        if cache.exists(&mean_key) && cache.exists(&count_key) {
            let cached = cache.get_array(&mean_key).and_then(|mean| {
                Ok(Statistics {
                    mean,
                    sum_sq_dev: cache.get_array(&variance_key)?,
                    count: cache.get(&count_key)?,
                })
            });
            match cached {
                Ok(stats) => {
                    info!(stage = name, "loaded cached statistics");
                    return Ok(stats);
                }
                Err(e) if e.is_not_found() => {
                    warn!(stage = name, "cached statistics are incomplete, recomputing");
                }
                Err(e) => return Err(e),
            }
        }

        info!(stage = name, batches = source.num_batches(), "computing statistics");
        let mut acc = StreamingStats::new(source.image_shape());
        for index in 0..source.num_batches() {
            let batch = source.batch(index)?;
            acc.observe_rows(&batch.pixels)?;
        }
        let stats = acc.finish();

        cache.put_array(&mean_key, &stats.mean)?;
        cache.put_array(&variance_key, &stats.sum_sq_dev)?;
        cache.put(&count_key, &stats.count)?;
        Ok(stats)
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn mean(&self) -> &Array {
        &self.mean
    }

    /// Accumulated squared deviation; divide by `count` for the variance.
    pub fn sum_sq_dev(&self) -> &Array {
        &self.sum_sq_dev
    }

    /// Population variance per feature.
    pub fn variance(&self) -> Array {
        let n = self.count.max(1.0);
        self.sum_sq_dev.map(|s| s / n)
    }

    /// `1 / std_dev` per feature, 0 where the deviation is 0.
    pub fn scale(&self) -> Array {
        self.variance().map(|v| {
            let std_dev = v.sqrt();
            if std_dev == 0.0 {
                0.0
            } else {
                1.0 / std_dev
            }
        })
    }

    /// `(x - mean) * scale` applied to every row of a `[n] + shape` array.
    pub fn normalize(&self, rows: &Array) -> Result<Array> {
        if rows.row_len() != self.mean.len() {
            return Err(PipelineError::Shape(format!(
                "cannot normalize {:?} with statistics of shape {:?}",
                rows.shape(),
                self.mean.shape()
            )));
        }
        let scale = self.scale();
        let mut out = rows.clone();
        for i in 0..out.rows() {
            for ((x, m), s) in out.row_mut(i).iter_mut().zip(self.mean.data()).zip(scale.data()) {
                *x = (*x - m) * s;
            }
        }
        Ok(out)
    }
}

fn keys(name: &str) -> (String, String, String) {
    (format!("{name}-mean"), format!("{name}-variance"), format!("{name}-count"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn one_shot(rows: &Array) -> (Vec<f64>, Vec<f64>) {
        let n = rows.rows() as f64;
        let d = rows.row_len();
        let mut mean = vec![0.0; d];
        for i in 0..rows.rows() {
            for (m, x) in mean.iter_mut().zip(rows.row(i)) {
                *m += x / n;
            }
        }
        let mut var = vec![0.0; d];
        for i in 0..rows.rows() {
            for ((v, x), m) in var.iter_mut().zip(rows.row(i)).zip(&mean) {
                *v += (x - m) * (x - m) / n;
            }
        }
        (mean, var)
    }

    #[test]
    fn batching_does_not_change_the_result() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let data: Vec<f64> = (0..60 * 4).map(|_| rng.gen_range(0.0..255.0)).collect();
        let all = Array::from_vec(vec![60, 4], data).unwrap();
        let (mean, var) = one_shot(&all);

        for batch in [1usize, 6, 20, 60] {
            let mut acc = StreamingStats::new(&[4]);
            for start in (0..60).step_by(batch) {
                let idx: Vec<usize> = (start..start + batch).collect();
                acc.observe_rows(&all.gather_rows(&idx)).unwrap();
            }
            let stats = acc.finish();
            assert_eq!(stats.count(), 60.0);
            for (a, b) in stats.mean().data().iter().zip(&mean) {
                assert!((a - b).abs() < 1e-9);
            }
            for (a, b) in stats.variance().data().iter().zip(&var) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn constant_features_scale_to_zero() {
        let rows = Array::from_vec(vec![3, 2], vec![5.0, 1.0, 5.0, 2.0, 5.0, 3.0]).unwrap();
        let mut acc = StreamingStats::new(&[2]);
        acc.observe_rows(&rows).unwrap();
        let stats = acc.finish();

        let scale = stats.scale();
        assert_eq!(scale.data()[0], 0.0);
        assert!(scale.data()[1].is_finite() && scale.data()[1] > 0.0);

        let out = stats.normalize(&rows).unwrap();
        assert!(out.data().iter().all(|x| x.is_finite()));
        assert_eq!(out.row(0)[0], 0.0);
        assert!((out.row(1)[1]).abs() < 1e-12);
    }

    #[test]
    fn cached_statistics_short_circuit_the_pass() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let pixels = Array::from_vec(vec![8, 1, 1, 1], (0..8).map(|x| x as f64).collect()).unwrap();
        let source = MemorySource::new(pixels, vec![0; 8], 1, 2, 2).unwrap();

        let first = Statistics::compute(&source, &cache, "normalize-1").unwrap();
        assert_eq!(first.count(), 6.0);
        assert!((first.mean().data()[0] - 4.5).abs() < 1e-12);
        assert!(cache.exists("normalize-1-mean"));
        assert!(cache.exists("normalize-1-count"));

        // A different source under the same name must not be read at all.
        let other = MemorySource::new(Array::zeros(&[4, 1, 1, 1]), vec![0; 4], 1, 2, 0).unwrap();
        let second = Statistics::compute(&other, &cache, "normalize-1").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn incomplete_cache_entries_are_recomputed() {
        let dir = tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        cache.put_array("normalize-1-mean", &Array::zeros(&[1, 1, 1])).unwrap();
        cache.put("normalize-1-count", &99.0f64).unwrap();

        let pixels = Array::from_vec(vec![8, 1, 1, 1], (0..8).map(|x| x as f64).collect()).unwrap();
        let source = MemorySource::new(pixels, vec![0; 8], 1, 2, 2).unwrap();
        let stats = Statistics::compute(&source, &cache, "normalize-1").unwrap();

        assert_eq!(stats.count(), 6.0);
        assert!((stats.mean().data()[0] - 4.5).abs() < 1e-12);
        assert!(cache.exists("normalize-1-variance"));
        assert_eq!(cache.get::<f64>("normalize-1-count").unwrap(), 6.0);
    }
}
