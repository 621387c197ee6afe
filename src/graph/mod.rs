pub mod graph;
pub mod naming;
pub mod persist;
pub mod spec;
pub mod stage;

pub use graph::StageGraph;
pub use naming::NameContext;
pub use persist::{parameter_key, SaveHandle};
pub use spec::{GraphDefaults, GraphSpec, StageSpec};
pub use stage::{Activation, Parameter, Regularization, Stage, StageKind};
