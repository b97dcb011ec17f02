use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::transform::SkipReason;
use crate::signal::AccountRef;

/// Canonical order status shared by every destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Filled,
    PartiallyFilled,
    Rejected,
    Cancelled,
    Error,
}

impl ExecutionStatus {
    /// The destination took the order; counts as a copied trade.
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Pending | ExecutionStatus::Filled | ExecutionStatus::PartiallyFilled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Filled => "filled",
            ExecutionStatus::PartiallyFilled => "partially_filled",
            ExecutionStatus::Rejected => "rejected",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Outcome of dispatching one signal through one rule. Never mutated once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub signal_id: Uuid,
    /// Absent when the rule failed before a derived signal existed.
    pub derived_signal_id: Option<Uuid>,
    pub rule_id: Uuid,
    pub destination: AccountRef,
    pub timestamp: DateTime<Utc>,
    pub order_id: Option<String>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub filled_quantity: u32,
    pub fill_price: Option<f64>,
}

impl ExecutionRecord {
    pub(crate) fn failed(
        signal_id: Uuid,
        derived_signal_id: Option<Uuid>,
        rule_id: Uuid,
        destination: AccountRef,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal_id,
            derived_signal_id,
            rule_id,
            destination,
            timestamp: Utc::now(),
            order_id: None,
            status: ExecutionStatus::Error,
            error: Some(error.into()),
            filled_quantity: 0,
            fill_price: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedRule {
    pub rule_id: Uuid,
    pub destination: AccountRef,
    pub reason: SkipReason,
}

/// Everything one dispatch call produced, in rule-iteration order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    pub signal_id: Uuid,
    pub records: Vec<ExecutionRecord>,
    pub skipped: Vec<SkippedRule>,
}

impl DispatchReport {
    pub fn summary(&self) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for record in &self.records {
            summary.add(record);
        }
        summary.skipped = self.skipped.len() as u64;
        summary
    }

    pub fn into_records(self) -> Vec<ExecutionRecord> {
        self.records
    }
}

/// Status counts across any number of execution records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub total: u64,
    pub accepted: u64,
    pub skipped: u64,
    pub filled_quantity: u64,
    pub by_status: HashMap<ExecutionStatus, u64>,
}

impl DispatchSummary {
    pub fn add(&mut self, record: &ExecutionRecord) {
        self.total += 1;
        if record.status.is_accepted() {
            self.accepted += 1;
        }
        self.filled_quantity += u64::from(record.filled_quantity);
        *self.by_status.entry(record.status).or_insert(0) += 1;
    }

    pub fn count(&self, status: ExecutionStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn failed(&self) -> u64 {
        self.count(ExecutionStatus::Error) + self.count(ExecutionStatus::Rejected)
    }
}
