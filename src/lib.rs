//! Signal Copier - trade signal distribution engine
//!
//! Takes one trade event observed on a monitored account, works out which
//! destination accounts should receive a copy, transforms it per destination
//! and hands each copy to that destination's broker executor, recording one
//! outcome per destination even when some of them fail.

pub mod bus;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod executor;
pub mod records;
pub mod routing;
pub mod services;
pub mod signal;

// Re-export commonly used types
pub use bus::EventBus;
pub use config::AppConfig;
pub use error::{DispatchError, ExecutorError, TransformError};
pub use events::Event;
pub use records::{DispatchReport, DispatchSummary, ExecutionRecord, ExecutionStatus};
pub use routing::{InMemoryRuleSource, RoutingRule, RuleSource};
pub use services::{transform, Dispatcher, SkipReason, TransformOutcome};
pub use signal::{AccountRef, Action, OrderType, Signal, SignalStatus, TimeInForce};
