pub mod registry;
pub mod traits;

pub mod alpaca;
pub mod paper;
pub mod webhook;

pub use registry::{build_registry, ExecutorRegistry};
pub use traits::{DestinationExecutor, ExecutorOutcome, ExecutorResult};
