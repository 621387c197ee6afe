use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::corpus::CorpusIndex;
use crate::error::Result;
use crate::loader::batch::{encode_labels, load_images, Batch};
use crate::loader::decode::ImageDecoder;
use crate::math::array::Array;

/// Everything needed to decode a batch from disk, shareable with the
/// prefetch worker.
pub struct BatchReader {
    index: Arc<CorpusIndex>,
    image_shape: Vec<usize>,
    decoder: Arc<dyn ImageDecoder>,
    cache: CacheStore,
}

impl BatchReader {
    pub fn new(
        index: Arc<CorpusIndex>,
        image_shape: Vec<usize>,
        decoder: Arc<dyn ImageDecoder>,
        cache: CacheStore,
    ) -> BatchReader {
        BatchReader { index, image_shape, decoder, cache }
    }

    pub fn index(&self) -> &CorpusIndex {
        &self.index
    }

    pub fn image_shape(&self) -> &[usize] {
        &self.image_shape
    }

    pub fn num_batches(&self) -> usize {
        self.index.num_batches()
    }

    /// Decodes trainable batch `index` straight from disk (or the pixel cache).
    pub fn load_batch(&self, index: usize) -> Result<Batch> {
        let (files, labels) = self.index.batch_entries(index)?;
        let pixels = self.load_images(files)?;
        self.assemble(pixels, labels.to_vec())
    }

    pub fn load_images(&self, files: &[PathBuf]) -> Result<Array> {
        load_images(files, &self.image_shape, self.decoder.as_ref(), &self.cache)
    }

    /// Pairs already loaded pixels with their labels.
    pub fn assemble(&self, pixels: Array, labels: Vec<usize>) -> Result<Batch> {
        let encoded = encode_labels(&labels, self.index.num_classes())?;
        Ok(Batch { pixels, labels, encoded })
    }
}
