use std::path::Path;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::math::array::Array;

/// Turns one file into a fixed-shape `[channels, height, width]` array.
///
/// Implementations are shared with the async prefetch worker, hence
/// `Send + Sync`. A failure aborts the whole load call it belongs to.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Array>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Rgb,
    Grayscale,
}

/// Decodes PNG/JPEG/BMP/GIF files with the `image` crate.
///
/// Pixel values are raw intensities in [0, 255]; normalization is the job of
/// a normalization stage. Images are optionally resized to `width × height`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterDecoder {
    pub color: ColorMode,
    pub resize: Option<(u32, u32)>,
}

impl Default for RasterDecoder {
    fn default() -> Self {
        RasterDecoder { color: ColorMode::Rgb, resize: None }
    }
}

impl RasterDecoder {
    pub fn grayscale() -> Self {
        RasterDecoder { color: ColorMode::Grayscale, resize: None }
    }

    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = Some((width, height));
        self
    }
}

impl ImageDecoder for RasterDecoder {
    fn decode(&self, path: &Path) -> Result<Array> {
        let img = image::open(path).map_err(|e| PipelineError::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let img = match self.resize {
            Some((w, h)) => img.resize_exact(w, h, FilterType::Lanczos3),
            None => img,
        };

        let (width, height) = (img.width() as usize, img.height() as usize);
        match self.color {
            ColorMode::Grayscale => {
                let gray = img.to_luma8();
                let data = gray.pixels().map(|p| p.0[0] as f64).collect();
                Array::from_vec(vec![1, height, width], data)
            }
            ColorMode::Rgb => {
                // Interleaved RGB to channel-major planes.
                let rgb = img.to_rgb8();
                let plane = width * height;
                let mut data = vec![0.0; 3 * plane];
                for (i, p) in rgb.pixels().enumerate() {
                    for c in 0..3 {
                        data[c * plane + i] = p.0[c] as f64;
                    }
                }
                Array::from_vec(vec![3, height, width], data)
            }
        }
    }
}
