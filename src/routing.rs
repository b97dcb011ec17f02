//! Source → destination routing rules and their usage statistics.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, RuleSourceError};
use crate::signal::AccountRef;

/// Snapshot of a rule's usage counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatsSnapshot {
    pub trades_copied: u64,
    pub last_trade_at: Option<DateTime<Utc>>,
}

/// Usage counters owned by a single rule.
///
/// Both fields change together under one lock, so concurrent dispatches of
/// the same rule never lose an update. Different rules never share a lock.
#[derive(Debug, Default)]
pub struct RuleStats {
    inner: Mutex<RuleStatsSnapshot>,
}

impl RuleStats {
    pub fn restore(snapshot: RuleStatsSnapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    pub fn record_copy(&self, at: DateTime<Utc>) -> RuleStatsSnapshot {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        stats.trades_copied += 1;
        // Completion order may differ from dispatch order.
        if stats.last_trade_at.map_or(true, |prev| at > prev) {
            stats.last_trade_at = Some(at);
        }
        *stats
    }

    pub fn snapshot(&self) -> RuleStatsSnapshot {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One source → destination link with its transformation parameters.
///
/// Everything except `stats` belongs to configuration management; the
/// dispatcher only reads it.
#[derive(Debug, Deserialize)]
pub struct RoutingRule {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub source: AccountRef,
    pub destination: AccountRef,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    #[serde(default = "default_true")]
    pub copy_stop_loss: bool,
    #[serde(default = "default_true")]
    pub copy_take_profit: bool,
    #[serde(default)]
    pub reverse_signals: bool,
    #[serde(default)]
    pub symbol_whitelist: HashSet<String>,
    #[serde(default)]
    pub symbol_blacklist: HashSet<String>,
    #[serde(default)]
    pub max_position_size: Option<u32>,
    /// Carried for the risk collaborator; the engine has no P&L view.
    #[serde(default)]
    pub max_daily_loss: Option<f64>,
    #[serde(skip)]
    pub stats: RuleStats,
}

fn default_true() -> bool {
    true
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

impl RoutingRule {
    /// Active 1:1 copy rule with protective levels copied.
    pub fn new(source: AccountRef, destination: AccountRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            destination,
            active: true,
            multiplier: Decimal::ONE,
            copy_stop_loss: true,
            copy_take_profit: true,
            reverse_signals: false,
            symbol_whitelist: HashSet::new(),
            symbol_blacklist: HashSet::new(),
            max_position_size: None,
            max_daily_loss: None,
            stats: RuleStats::default(),
        }
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_whitelist<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbol_whitelist = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_blacklist<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbol_blacklist = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_position_size(mut self, cap: u32) -> Self {
        self.max_position_size = Some(cap);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse_signals = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn without_stop_loss(mut self) -> Self {
        self.copy_stop_loss = false;
        self
    }

    pub fn without_take_profit(mut self) -> Self {
        self.copy_take_profit = false;
        self
    }

    pub fn is_self_route(&self) -> bool {
        self.source == self.destination
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_self_route() {
            return Err(ConfigError::InvalidRule {
                rule_id: self.id,
                reason: format!("source and destination are both {}", self.source),
            });
        }
        if self.multiplier < Decimal::ZERO {
            return Err(ConfigError::InvalidRule {
                rule_id: self.id,
                reason: format!("negative multiplier {}", self.multiplier),
            });
        }
        Ok(())
    }
}

/// Configuration collaborator that knows which rules apply to a source.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn rules_for_source(&self, source: &AccountRef) -> Result<Vec<Arc<RoutingRule>>, RuleSourceError>;
}

/// Rules held in memory, indexed by source account.
#[derive(Clone, Default)]
pub struct InMemoryRuleSource {
    by_source: HashMap<AccountRef, Vec<Arc<RoutingRule>>>,
}

impl InMemoryRuleSource {
    pub fn new(rules: impl IntoIterator<Item = Arc<RoutingRule>>) -> Self {
        let mut by_source: HashMap<AccountRef, Vec<Arc<RoutingRule>>> = HashMap::new();
        for rule in rules {
            by_source.entry(rule.source.clone()).or_default().push(rule);
        }
        Self { by_source }
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<RoutingRule>> {
        self.by_source.values().flatten()
    }
}

#[async_trait]
impl RuleSource for InMemoryRuleSource {
    async fn rules_for_source(&self, source: &AccountRef) -> Result<Vec<Arc<RoutingRule>>, RuleSourceError> {
        Ok(self.by_source.get(source).cloned().unwrap_or_default())
    }
}
