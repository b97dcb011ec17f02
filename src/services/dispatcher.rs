//! Fan-out of one signal to every destination whose rule matches its source.
//!
//! Each eligible rule gets its own task. Tasks share nothing but the batch
//! deadline; results are joined back in rule order so the returned records
//! line up with the rules that produced them, whatever order the brokers
//! answered in. Dropping a dispatch aborts the tasks still in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::config::DispatchConfig;
use crate::constants::{dispatch::TIMEOUT_MESSAGE, events};
use crate::error::DispatchError;
use crate::events::Event;
use crate::executor::{DestinationExecutor, ExecutorOutcome, ExecutorRegistry};
use crate::records::{DispatchReport, ExecutionRecord, ExecutionStatus, SkippedRule};
use crate::routing::{RoutingRule, RuleSource};
use crate::signal::Signal;

use super::transform::{transform, TransformOutcome};

/// A rule's place in the output, either settled up front or still running.
enum Slot {
    Done(ExecutionRecord),
    Running {
        rule: Arc<RoutingRule>,
        derived_id: Uuid,
        handle: AbortOnDrop,
    },
}

/// Aborts the executor task when the dispatch that owns it is dropped.
struct AbortOnDrop(JoinHandle<ExecutionRecord>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: ExecutorRegistry,
    deadline: Duration,
    bus: Option<EventBus>,
}

impl Dispatcher {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self {
            registry,
            deadline: Duration::from_millis(crate::constants::dispatch::DEFAULT_DEADLINE_MS),
            bus: None,
        }
    }

    pub fn from_config(registry: ExecutorRegistry, config: &DispatchConfig) -> Self {
        Self::new(registry).with_deadline(Duration::from_millis(config.deadline_ms))
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Dispatches `signal` through `rules` and returns one record per rule
    /// that was not skipped, in rule order.
    pub async fn dispatch(
        &self,
        signal: &Signal,
        rules: &[Arc<RoutingRule>],
    ) -> Result<Vec<ExecutionRecord>, DispatchError> {
        Ok(self.dispatch_report(signal, rules).await?.into_records())
    }

    /// Looks the rules up through `source` first, then dispatches.
    pub async fn dispatch_from(
        &self,
        signal: &Signal,
        source: &dyn RuleSource,
    ) -> Result<DispatchReport, DispatchError> {
        let rules = source.rules_for_source(&signal.source).await?;
        self.dispatch_report(signal, &rules).await
    }

    /// Like [`Dispatcher::dispatch`], but also reports which rules were skipped and why.
    pub async fn dispatch_report(
        &self,
        signal: &Signal,
        rules: &[Arc<RoutingRule>],
    ) -> Result<DispatchReport, DispatchError> {
        signal.validate()?;

        let dispatched_at = Utc::now();
        let deadline = Instant::now() + self.deadline;
        info!(
            event = events::SIGNAL_RECEIVED,
            "📡 [DISPATCH] signal {} from {}: {} {} x{}",
            signal.id, signal.source, signal.action, signal.symbol, signal.quantity
        );
        self.publish(Event::SignalReceived(signal.clone()));

        let mut slots = Vec::new();
        let mut skipped = Vec::new();

        for rule in rules.iter().filter(|r| r.source == signal.source) {
            let derived = match transform(signal, rule) {
                Ok(TransformOutcome::Derived(derived)) => derived,
                Ok(TransformOutcome::Skip(reason)) => {
                    debug!(
                        event = events::RULE_SKIPPED,
                        "[DISPATCH] rule {} -> {} skipped: {}",
                        rule.id, rule.destination, reason
                    );
                    let entry = SkippedRule {
                        rule_id: rule.id,
                        destination: rule.destination.clone(),
                        reason,
                    };
                    self.publish(Event::RuleSkipped {
                        signal_id: signal.id,
                        skipped: entry.clone(),
                    });
                    skipped.push(entry);
                    continue;
                }
                Err(e) => {
                    warn!("[DISPATCH] rule {} -> {}: {}", rule.id, rule.destination, e);
                    slots.push(Slot::Done(ExecutionRecord::failed(
                        signal.id,
                        None,
                        rule.id,
                        rule.destination.clone(),
                        e.to_string(),
                    )));
                    continue;
                }
            };

            if rule.is_self_route() {
                warn!("[DISPATCH] rule {} routes {} onto itself", rule.id, rule.source);
                slots.push(Slot::Done(ExecutionRecord::failed(
                    signal.id,
                    Some(derived.id),
                    rule.id,
                    rule.destination.clone(),
                    format!("invalid rule: source and destination are both {}", rule.source),
                )));
                continue;
            }

            let Some(executor) = self.registry.get(&rule.destination.platform) else {
                error!(
                    event = events::EXECUTOR_FAILED,
                    "❌ [DISPATCH] no executor registered for platform '{}'",
                    rule.destination.platform
                );
                slots.push(Slot::Done(ExecutionRecord::failed(
                    signal.id,
                    Some(derived.id),
                    rule.id,
                    rule.destination.clone(),
                    format!("no executor registered for platform '{}'", rule.destination.platform),
                )));
                continue;
            };

            let derived_id = derived.id;
            let handle = spawn_execution(
                signal.id,
                derived,
                Arc::clone(rule),
                executor,
                deadline,
                dispatched_at,
            );
            slots.push(Slot::Running {
                rule: Arc::clone(rule),
                derived_id,
                handle: AbortOnDrop(handle),
            });
        }

        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            let record = match slot {
                Slot::Done(record) => record,
                Slot::Running {
                    rule,
                    derived_id,
                    mut handle,
                } => match (&mut handle.0).await {
                    Ok(record) => record,
                    Err(e) => {
                        error!("❌ [DISPATCH] executor task for rule {} aborted: {}", rule.id, e);
                        ExecutionRecord::failed(
                            signal.id,
                            Some(derived_id),
                            rule.id,
                            rule.destination.clone(),
                            format!("executor task aborted: {}", e),
                        )
                    }
                },
            };
            self.publish(Event::Executed(record.clone()));
            records.push(record);
        }

        let report = DispatchReport {
            signal_id: signal.id,
            records,
            skipped,
        };
        let summary = report.summary();
        info!(
            "📊 [DISPATCH] signal {} done: {} records ({} accepted, {} failed), {} skipped",
            signal.id,
            summary.total,
            summary.accepted,
            summary.failed(),
            summary.skipped
        );
        Ok(report)
    }

    fn publish(&self, event: Event) {
        if let Some(bus) = &self.bus {
            // No subscribers is fine
            bus.publish(event).ok();
        }
    }
}

fn spawn_execution(
    signal_id: Uuid,
    derived: Signal,
    rule: Arc<RoutingRule>,
    executor: Arc<dyn DestinationExecutor>,
    deadline: Instant,
    dispatched_at: DateTime<Utc>,
) -> JoinHandle<ExecutionRecord> {
    tokio::spawn(async move {
        let call = executor.execute(&derived, &rule.destination);
        let record = match tokio::time::timeout_at(deadline, call).await {
            Ok(Ok(outcome)) => record_from_outcome(signal_id, &derived, &rule, outcome),
            Ok(Err(e)) => {
                error!(
                    event = events::EXECUTOR_FAILED,
                    "❌ [DISPATCH] {} failed for rule {}: {}",
                    rule.destination, rule.id, e
                );
                ExecutionRecord::failed(signal_id, Some(derived.id), rule.id, rule.destination.clone(), e.to_string())
            }
            Err(_) => {
                warn!(
                    event = events::EXECUTOR_FAILED,
                    "⏱️ [DISPATCH] {} missed the deadline for rule {}",
                    rule.destination, rule.id
                );
                ExecutionRecord::failed(signal_id, Some(derived.id), rule.id, rule.destination.clone(), TIMEOUT_MESSAGE)
            }
        };

        if record.status.is_accepted() {
            let stats = rule.stats.record_copy(dispatched_at);
            debug!("[DISPATCH] rule {} has copied {} trades", rule.id, stats.trades_copied);
        }
        record
    })
}

fn record_from_outcome(
    signal_id: Uuid,
    derived: &Signal,
    rule: &RoutingRule,
    outcome: ExecutorOutcome,
) -> ExecutionRecord {
    match outcome.status {
        ExecutionStatus::Rejected => warn!(
            event = events::ORDER_REJECTED,
            "⚠️ [DISPATCH] {} rejected {} {} ({}): {}",
            rule.destination,
            derived.action,
            derived.symbol,
            outcome.native_status,
            outcome.message.as_deref().unwrap_or("no reason given")
        ),
        status => info!(
            event = events::ORDER_COPIED,
            "✅ [DISPATCH] {} {} {} x{} -> {} ({})",
            rule.destination,
            derived.action,
            derived.symbol,
            derived.quantity,
            status,
            outcome.order_id.as_deref().unwrap_or("no order id")
        ),
    }

    let error = if outcome.status.is_accepted() {
        None
    } else {
        outcome.message.or_else(|| Some(outcome.native_status.clone()))
    };

    ExecutionRecord {
        id: Uuid::new_v4(),
        signal_id,
        derived_signal_id: Some(derived.id),
        rule_id: rule.id,
        destination: rule.destination.clone(),
        timestamp: Utc::now(),
        order_id: outcome.order_id,
        status: outcome.status,
        error,
        filled_quantity: outcome.filled_quantity,
        fill_price: outcome.fill_price,
    }
}
