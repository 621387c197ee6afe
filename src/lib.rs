pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod graph;
pub mod loader;
pub mod logging;
pub mod math;
pub mod source;
pub mod stats;
pub mod train;

// Convenience re-exports
pub use cache::CacheStore;
pub use config::{PipelineConfig, SourceConfig};
pub use corpus::CorpusIndex;
pub use error::{PipelineError, Result};
pub use graph::{GraphSpec, NameContext, SaveHandle, StageGraph, StageKind};
pub use loader::{Batch, BatchLoader, ImageDecoder, LoadMethod, RasterDecoder};
pub use logging::init_tracing;
pub use math::Array;
pub use source::{DataSource, ImageSource, MemorySource};
pub use stats::{Statistics, StreamingStats};
pub use train::{train_loop, Learner, TrainConfig, TrainEvent, TrainReport};
