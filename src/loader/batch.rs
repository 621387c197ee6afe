use std::path::PathBuf;

use tracing::info;

use crate::cache::{stable_key, CacheStore};
use crate::error::{PipelineError, Result};
use crate::loader::decode::ImageDecoder;
use crate::math::array::Array;

/// One batch: pixels `[n] + image_shape`, raw labels, one-hot labels
/// `[n, num_classes]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub pixels: Array,
    pub labels: Vec<usize>,
    pub encoded: Array,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// One-hot encodes `labels`: row `i` is 1 at column `labels[i]`, 0 elsewhere.
pub fn encode_labels(labels: &[usize], num_classes: usize) -> Result<Array> {
    let mut encoded = Array::zeros(&[labels.len(), num_classes]);
    for (row, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(PipelineError::config(format!(
                "label {label} outside 0..{num_classes}"
            )));
        }
        encoded.row_mut(row)[label] = 1.0;
    }
    Ok(encoded)
}

/// Decodes `files` into one `[files.len()] + image_shape` array.
///
/// The result is cached under a hash of the exact ordered file list, so the
/// same slice requested again (e.g. next epoch) skips decoding.
pub fn load_images(
    files: &[PathBuf],
    image_shape: &[usize],
    decoder: &dyn ImageDecoder,
    cache: &CacheStore,
) -> Result<Array> {
    let key = stable_key("data", files)?;
    if cache.exists(&key) {
        return cache.get_array(&key);
    }

    let mut shape = vec![files.len()];
    shape.extend_from_slice(image_shape);
    let mut data = Array::zeros(&shape);

    for (index, file) in files.iter().enumerate() {
        let image = decoder.decode(file)?;
        if image.shape() != image_shape {
            return Err(PipelineError::Decode {
                path: file.clone(),
                message: format!(
                    "decoded shape {:?} differs from corpus shape {:?}",
                    image.shape(),
                    image_shape
                ),
            });
        }
        data.row_mut(index).copy_from_slice(image.data());

        if index > 0 && index % 1000 == 0 {
            info!("read {index} images");
        }
    }

    cache.put_array(&key, &data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot_rows() {
        let encoded = encode_labels(&[0, 1, 1, 2], 3).unwrap();
        assert_eq!(encoded.shape(), &[4, 3]);
        assert_eq!(
            encoded.data(),
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn out_of_range_label_is_rejected() {
        assert!(encode_labels(&[0, 3], 3).is_err());
    }
}
