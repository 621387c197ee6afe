pub mod streaming;

pub use streaming::{Statistics, StreamingStats};
