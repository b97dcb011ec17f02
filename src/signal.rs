//! Normalized trade events observed on a monitored account.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

/// Identity of a trading account on a given platform.
///
/// Rules and records only ever hold this reference; full account records
/// live with the configuration collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub platform: String,
    pub account_id: String,
}

impl AccountRef {
    pub fn new(platform: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.account_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    SellShort,
    BuyToCover,
}

impl Action {
    /// Whether the action reduces an existing position.
    pub fn is_closing(self) -> bool {
        matches!(self, Action::Sell | Action::BuyToCover)
    }

    /// Mirror image on the opposite side of the book.
    ///
    /// Opening actions map to opening actions and closing to closing, so
    /// reversing twice yields the original action.
    pub fn reversed(self) -> Action {
        match self {
            Action::Buy => Action::SellShort,
            Action::SellShort => Action::Buy,
            Action::Sell => Action::BuyToCover,
            Action::BuyToCover => Action::Sell,
        }
    }

    pub fn is_buy_side(self) -> bool {
        matches!(self, Action::Buy | Action::BuyToCover)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::SellShort => "sell_short",
            Action::BuyToCover => "buy_to_cover",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn requires_limit_price(self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    pub fn requires_stop_price(self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    #[default]
    Day,
    Gtc,
    Ioc,
    Fok,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    #[default]
    Received,
    Processing,
    Executed,
    Failed,
    Cancelled,
}

/// One trade event eligible for copying.
///
/// The engine treats a `Signal` as the audit record of what happened on the
/// source account. Per-destination copies are new instances with their own
/// `id`, built by the transform stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub source: AccountRef,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: Action,
    pub order_type: OrderType,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    /// Explicit closing flag from the source platform. When absent the
    /// action decides, see [`Signal::closes_position`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_closing: Option<bool>,
    #[serde(default)]
    pub status: SignalStatus,
}

impl Signal {
    /// Market order with everything optional left empty.
    pub fn market(source: AccountRef, symbol: impl Into<String>, action: Action, quantity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            timestamp: Utc::now(),
            symbol: symbol.into(),
            action,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            stop_loss: None,
            take_profit: None,
            time_in_force: TimeInForce::Day,
            is_closing: None,
            status: SignalStatus::Received,
        }
    }

    pub fn with_limit(mut self, price: f64) -> Self {
        self.order_type = match self.order_type {
            OrderType::Stop | OrderType::StopLimit => OrderType::StopLimit,
            _ => OrderType::Limit,
        };
        self.limit_price = Some(price);
        self
    }

    pub fn with_stop(mut self, price: f64) -> Self {
        self.order_type = match self.order_type {
            OrderType::Limit | OrderType::StopLimit => OrderType::StopLimit,
            _ => OrderType::Stop,
        };
        self.stop_price = Some(price);
        self
    }

    /// Whether this signal reduces an existing position.
    pub fn closes_position(&self) -> bool {
        self.is_closing.unwrap_or_else(|| self.action.is_closing())
    }

    pub fn with_protection(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    /// Checks the invariants a signal must satisfy before it is dispatched.
    pub fn validate(&self) -> Result<(), DispatchError> {
        let invalid = |reason: String| DispatchError::InvalidSignal {
            signal_id: self.id,
            reason,
        };

        if self.symbol.trim().is_empty() {
            return Err(invalid("empty symbol".to_string()));
        }
        if self.quantity == 0 {
            return Err(invalid("quantity must be positive".to_string()));
        }

        match (self.order_type.requires_limit_price(), self.limit_price) {
            (true, None) => return Err(invalid(format!("{:?} order without limit price", self.order_type))),
            (false, Some(_)) => return Err(invalid(format!("{:?} order carries a limit price", self.order_type))),
            (true, Some(p)) if !(p.is_finite() && p > 0.0) => {
                return Err(invalid(format!("invalid limit price {}", p)))
            }
            _ => {}
        }

        match (self.order_type.requires_stop_price(), self.stop_price) {
            (true, None) => return Err(invalid(format!("{:?} order without stop price", self.order_type))),
            (false, Some(_)) => return Err(invalid(format!("{:?} order carries a stop price", self.order_type))),
            (true, Some(p)) if !(p.is_finite() && p > 0.0) => {
                return Err(invalid(format!("invalid stop price {}", p)))
            }
            _ => {}
        }

        Ok(())
    }
}
