use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::events::Event;
use crate::records::{DispatchSummary, ExecutionRecord};

/// Per-rule tallies seen on the bus.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleTally {
    pub executed: u64,
    pub accepted: u64,
    pub skipped: u64,
}

/// Running aggregate of everything the dispatcher published.
#[derive(Clone, Default)]
pub struct DispatchJournal {
    summary: Arc<Mutex<DispatchSummary>>,
    signals: Arc<AtomicU64>,
    per_rule: Arc<DashMap<Uuid, RuleTally>>,
}

impl DispatchJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> DispatchSummary {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn signals_seen(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    pub fn rule_tally(&self, rule_id: &Uuid) -> RuleTally {
        self.per_rule
            .get(rule_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Subscribes to `event_bus` and folds events in until the bus closes.
    pub fn start(&self, event_bus: &EventBus) -> JoinHandle<()> {
        let mut rx = event_bus.subscribe();
        let journal = self.clone();

        tokio::spawn(async move {
            info!("📈 [JOURNAL] started");
            loop {
                match rx.recv().await {
                    Ok(event) => journal.apply(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("[JOURNAL] lagged, {} events dropped", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("[JOURNAL] bus closed, stopping");
        })
    }

    pub fn apply(&self, event: &Event) {
        match event {
            Event::SignalReceived(_) => {
                self.signals.fetch_add(1, Ordering::Relaxed);
            }
            Event::RuleSkipped { skipped, .. } => {
                self.summary.lock().unwrap_or_else(PoisonError::into_inner).skipped += 1;
                self.per_rule.entry(skipped.rule_id).or_default().skipped += 1;
            }
            Event::Executed(record) => self.on_record(record),
        }
    }

    fn on_record(&self, record: &ExecutionRecord) {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(record);

        let mut tally = self.per_rule.entry(record.rule_id).or_default();
        tally.executed += 1;
        if record.status.is_accepted() {
            tally.accepted += 1;
        }
    }
}
