pub mod batch;
pub mod decode;
pub mod loader;
pub mod prefetch;
pub mod reader;

pub use batch::{encode_labels, load_images, Batch};
pub use decode::{ColorMode, ImageDecoder, RasterDecoder};
pub use loader::{BatchLoader, LoadMethod, PreloadedImages};
pub use prefetch::{Prefetcher, PREFETCH_POLL_INTERVAL};
pub use reader::BatchReader;
