pub mod dispatcher;
pub mod journal;
pub mod transform;

pub use dispatcher::Dispatcher;
pub use journal::DispatchJournal;
pub use transform::{transform, SkipReason, TransformOutcome};

#[cfg(test)]
mod dispatcher_tests;
