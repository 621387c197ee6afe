pub mod key;
pub mod store;

pub use key::stable_key;
pub use store::{CacheStore, ARRAY_SUFFIX};
