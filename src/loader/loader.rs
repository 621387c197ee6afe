use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::loader::batch::Batch;
use crate::loader::prefetch::Prefetcher;
use crate::loader::reader::BatchReader;
use crate::math::array::Array;

/// How batches get from disk into memory.
///
/// - `Sync`    : decode the requested files on every call.
/// - `Preload` : decode the whole corpus once and gather rows per batch.
/// - `Async`   : decode ahead of time on a background thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMethod {
    Sync,
    #[default]
    Preload,
    Async,
}

/// The whole corpus decoded into one array, addressed by path.
pub struct PreloadedImages {
    data: Array,
    rows: HashMap<PathBuf, usize>,
}

impl PreloadedImages {
    pub fn load(reader: &BatchReader, files: Vec<PathBuf>) -> Result<PreloadedImages> {
        info!(files = files.len(), "loading data into memory");
        let data = reader.load_images(&files)?;
        let rows = files.into_iter().enumerate().map(|(row, f)| (f, row)).collect();
        info!("done loading data");
        Ok(PreloadedImages { data, rows })
    }

    /// Copies the rows for `files`, in order.
    pub fn gather(&self, files: &[PathBuf]) -> Result<Array> {
        let indices = files
            .iter()
            .map(|f| {
                self.rows.get(f).copied().ok_or_else(|| {
                    PipelineError::config(format!("'{}' was not preloaded", f.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.data.gather_rows(&indices))
    }
}

/// Turns a batch index into a [`Batch`] using one of three strategies.
pub enum BatchLoader {
    Sync {
        reader: Arc<BatchReader>,
    },
    Preload {
        reader: Arc<BatchReader>,
        images: PreloadedImages,
    },
    Async {
        reader: Arc<BatchReader>,
        prefetcher: Prefetcher,
    },
}

impl BatchLoader {
    pub fn new(
        method: LoadMethod,
        reader: Arc<BatchReader>,
        max_batches_preload: usize,
    ) -> Result<BatchLoader> {
        Ok(match method {
            LoadMethod::Sync => BatchLoader::Sync { reader },
            LoadMethod::Preload => {
                let files = reader.index().distinct_files();
                let images = PreloadedImages::load(&reader, files)?;
                BatchLoader::Preload { reader, images }
            }
            LoadMethod::Async => {
                let prefetcher = Prefetcher::start(Arc::clone(&reader), max_batches_preload)?;
                BatchLoader::Async { reader, prefetcher }
            }
        })
    }

    pub fn method(&self) -> LoadMethod {
        match self {
            BatchLoader::Sync { .. } => LoadMethod::Sync,
            BatchLoader::Preload { .. } => LoadMethod::Preload,
            BatchLoader::Async { .. } => LoadMethod::Async,
        }
    }

    pub fn reader(&self) -> &BatchReader {
        match self {
            BatchLoader::Sync { reader }
            | BatchLoader::Preload { reader, .. }
            | BatchLoader::Async { reader, .. } => reader,
        }
    }

    pub fn batch(&self, index: usize) -> Result<Batch> {
        info!("retrieving batch {}", index + 1);
        match self {
            BatchLoader::Sync { reader } => reader.load_batch(index),
            BatchLoader::Preload { reader, images } => {
                let (files, labels) = reader.index().batch_entries(index)?;
                reader.assemble(images.gather(files)?, labels.to_vec())
            }
            BatchLoader::Async { reader, prefetcher } => {
                // Validate first: the worker would never produce this index.
                reader.index().batch_entries(index)?;
                prefetcher.next(index)
            }
        }
    }

    /// Loads an arbitrary file list outside the batch sequence (the test set).
    pub fn load_entries(&self, files: &[PathBuf], labels: Vec<usize>) -> Result<Batch> {
        let pixels = match self {
            BatchLoader::Preload { images, .. } => images.gather(files)?,
            _ => self.reader().load_images(files)?,
        };
        self.reader().assemble(pixels, labels)
    }
}
