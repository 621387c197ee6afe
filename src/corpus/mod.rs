pub mod balance;
pub mod index;

pub use balance::{balance_classes, cyclic_repeat, shuffle_in_lockstep};
pub use index::{CorpusIndex, IMAGE_LIST_KEY};
