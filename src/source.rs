use std::sync::Arc;

use tracing::info;

use crate::cache::CacheStore;
use crate::config::SourceConfig;
use crate::corpus::{cyclic_repeat, CorpusIndex};
use crate::error::{PipelineError, Result};
use crate::loader::{encode_labels, Batch, BatchLoader, BatchReader, ImageDecoder, LoadMethod};
use crate::math::array::Array;

/// Anything that can feed labeled batches to statistics or training.
///
/// `batch(i)` is valid for `i < num_batches()`. Every batch, including the
/// test set, holds exactly `batch_size()` samples.
pub trait DataSource {
    fn batch(&self, index: usize) -> Result<Batch>;

    /// `(held_out_size, batch)`: the held-out set padded to a full batch by
    /// cycling, plus its true size.
    fn test_set(&self) -> Result<(usize, Batch)>;

    fn num_batches(&self) -> usize;
    fn batch_size(&self) -> usize;

    /// Per-sample shape, `[channels, height, width]` for images.
    fn image_shape(&self) -> &[usize];

    fn num_classes(&self) -> usize;
}

/// Images read from one directory per class.
///
/// ```text
/// images/
///   one/      -> label 0
///   two/      -> label 1
///   three/    -> excluded via `exclude: ["three"]`
/// ```
pub struct ImageSource {
    index: Arc<CorpusIndex>,
    loader: BatchLoader,
    cache: CacheStore,
}

impl ImageSource {
    pub fn open(config: &SourceConfig, decoder: Arc<dyn ImageDecoder>) -> Result<ImageSource> {
        if let Some(dir) = &config.cache_dir {
            std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        let cache = CacheStore::from_option(config.cache_dir.clone());

        let index = Arc::new(CorpusIndex::build(config, &cache)?);

        let first = index
            .distinct_files()
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::config("corpus contains no files"))?;
        let image_shape = decoder.decode(&first)?.shape().to_vec();
        info!(shape = ?image_shape, classes = index.num_classes(), "image source ready");

        let reader = Arc::new(BatchReader::new(
            Arc::clone(&index),
            image_shape,
            decoder,
            cache.clone(),
        ));
        let loader = BatchLoader::new(config.load_method, reader, config.max_batches_preload)?;

        Ok(ImageSource { index, loader, cache })
    }

    pub fn index(&self) -> &CorpusIndex {
        &self.index
    }

    pub fn load_method(&self) -> LoadMethod {
        self.loader.method()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn class_names(&self) -> &[String] {
        self.index.class_names()
    }
}

/// Samples that already live in memory, partitioned like a corpus: the first
/// `test_set_size` rows are held out, the rest is cut into full batches.
pub struct MemorySource {
    pixels: Array,
    labels: Vec<usize>,
    num_classes: usize,
    batch_size: usize,
    test_set_size: usize,
    image_shape: Vec<usize>,
}

impl MemorySource {
    pub fn new(
        pixels: Array,
        labels: Vec<usize>,
        num_classes: usize,
        batch_size: usize,
        test_set_size: usize,
    ) -> Result<MemorySource> {
        if pixels.shape().is_empty() {
            return Err(PipelineError::Shape("samples need a leading row axis".into()));
        }
        if pixels.rows() != labels.len() {
            return Err(PipelineError::Shape(format!(
                "{} samples but {} labels",
                pixels.rows(),
                labels.len()
            )));
        }
        if batch_size == 0 {
            return Err(PipelineError::config("batch size must be at least 1"));
        }
        let test_set_size = test_set_size.min(batch_size).min(labels.len());
        let image_shape = pixels.shape()[1..].to_vec();
        Ok(MemorySource { pixels, labels, num_classes, batch_size, test_set_size, image_shape })
    }

    fn rows(&self, indices: &[usize]) -> Result<Batch> {
        let labels: Vec<usize> = indices.iter().map(|&i| self.labels[i]).collect();
        let encoded = encode_labels(&labels, self.num_classes)?;
        Ok(Batch { pixels: self.pixels.gather_rows(indices), labels, encoded })
    }
}

impl DataSource for MemorySource {
    fn batch(&self, index: usize) -> Result<Batch> {
        if index >= self.num_batches() {
            return Err(PipelineError::BatchOutOfRange { index, num_batches: self.num_batches() });
        }
        let start = self.test_set_size + index * self.batch_size;
        let indices: Vec<usize> = (start..start + self.batch_size).collect();
        self.rows(&indices)
    }

    fn test_set(&self) -> Result<(usize, Batch)> {
        if self.test_set_size == 0 {
            return Err(PipelineError::config("held-out set is empty"));
        }
        let held_out: Vec<usize> = (0..self.test_set_size).collect();
        let indices = cyclic_repeat(&held_out, self.batch_size);
        Ok((self.test_set_size, self.rows(&indices)?))
    }

    fn num_batches(&self) -> usize {
        (self.labels.len() - self.test_set_size) / self.batch_size
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn image_shape(&self) -> &[usize] {
        &self.image_shape
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl DataSource for ImageSource {
    fn batch(&self, index: usize) -> Result<Batch> {
        self.loader.batch(index)
    }

    fn test_set(&self) -> Result<(usize, Batch)> {
        info!("retrieving test set");
        let (held_out, files, labels) = self.index.test_entries()?;
        let batch = self.loader.load_entries(&files, labels)?;
        Ok((held_out, batch))
    }

    fn num_batches(&self) -> usize {
        self.index.num_batches()
    }

    fn batch_size(&self) -> usize {
        self.index.batch_size()
    }

    fn image_shape(&self) -> &[usize] {
        self.loader.reader().image_shape()
    }

    fn num_classes(&self) -> usize {
        self.index.num_classes()
    }
}
