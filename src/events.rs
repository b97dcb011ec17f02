use uuid::Uuid;

use crate::records::{ExecutionRecord, SkippedRule};
use crate::signal::Signal;

// Global Event Enum
#[derive(Clone, Debug)]
pub enum Event {
    SignalReceived(Signal),
    RuleSkipped { signal_id: Uuid, skipped: SkippedRule },
    Executed(ExecutionRecord),
}
