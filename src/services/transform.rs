//! Per-rule transformation of a source signal into a derived signal.
//!
//! Checks run in a fixed order and the first failing check wins:
//! active flag, whitelist, blacklist, scaled size. After that the size cap
//! is applied (a clamp, not a skip), the copy is built, the action is
//! optionally reversed and protective levels are stripped per the rule.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::TransformError;
use crate::routing::RoutingRule;
use crate::signal::{Signal, SignalStatus};

/// Why a rule was deliberately not acted upon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    RuleInactive,
    NotWhitelisted,
    Blacklisted,
    NonPositiveSize,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::RuleInactive => "rule inactive",
            SkipReason::NotWhitelisted => "not whitelisted",
            SkipReason::Blacklisted => "blacklisted",
            SkipReason::NonPositiveSize => "non-positive size after scaling",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransformOutcome {
    Derived(Signal),
    Skip(SkipReason),
}

impl TransformOutcome {
    pub fn derived(&self) -> Option<&Signal> {
        match self {
            TransformOutcome::Derived(signal) => Some(signal),
            TransformOutcome::Skip(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            TransformOutcome::Skip(reason) => Some(*reason),
            TransformOutcome::Derived(_) => None,
        }
    }
}

/// floor(quantity × multiplier), saturating at `u32::MAX`.
pub fn scale_quantity(quantity: u32, multiplier: Decimal) -> u32 {
    let scaled = (Decimal::from(quantity) * multiplier).floor();
    if scaled <= Decimal::ZERO {
        return 0;
    }
    scaled.to_u32().unwrap_or(u32::MAX)
}

/// Derives the copy of `signal` that `rule` would send to its destination.
///
/// Pure: the only non-deterministic part of the output is the new signal id.
pub fn transform(signal: &Signal, rule: &RoutingRule) -> Result<TransformOutcome, TransformError> {
    if !rule.active {
        return Ok(skip(signal, rule, SkipReason::RuleInactive));
    }
    if !rule.symbol_whitelist.is_empty() && !rule.symbol_whitelist.contains(&signal.symbol) {
        return Ok(skip(signal, rule, SkipReason::NotWhitelisted));
    }
    if rule.symbol_blacklist.contains(&signal.symbol) {
        return Ok(skip(signal, rule, SkipReason::Blacklisted));
    }

    let mut quantity = scale_quantity(signal.quantity, rule.multiplier);
    if quantity == 0 {
        return Ok(skip(signal, rule, SkipReason::NonPositiveSize));
    }
    if let Some(cap) = rule.max_position_size {
        if quantity > cap {
            debug!(
                "[TRANSFORM] rule {} clamps {} {} from {} to {}",
                rule.id, signal.symbol, signal.action, quantity, cap
            );
            quantity = cap;
        }
    }

    let mut derived = signal.clone();
    derived.id = Uuid::new_v4();
    derived.quantity = quantity;
    derived.status = SignalStatus::Received;

    if rule.reverse_signals {
        if signal.action.is_closing() != signal.closes_position() {
            return Err(TransformError::ReversalUndefined {
                signal_id: signal.id,
                action: signal.action,
                is_closing: signal.closes_position(),
            });
        }
        derived.action = signal.action.reversed();
    }

    if !rule.copy_stop_loss {
        derived.stop_loss = None;
    }
    if !rule.copy_take_profit {
        derived.take_profit = None;
    }

    Ok(TransformOutcome::Derived(derived))
}

fn skip(signal: &Signal, rule: &RoutingRule, reason: SkipReason) -> TransformOutcome {
    debug!(
        "[TRANSFORM] rule {} skips signal {} ({}): {}",
        rule.id, signal.id, signal.symbol, reason
    );
    TransformOutcome::Skip(reason)
}
