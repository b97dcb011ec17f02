use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{AlpacaConfig, AlpacaCredentials};
use crate::constants::alpaca::{API_KEY_HEADER, API_SECRET_HEADER};
use crate::error::ExecutorError;
use crate::records::ExecutionStatus;
use crate::signal::{AccountRef, OrderType, Signal, TimeInForce};

use super::traits::{DestinationExecutor, ExecutorOutcome, ExecutorResult};

#[derive(Serialize, Debug, PartialEq)]
pub struct PriceLevel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
}

/// Body of `POST /v2/orders`.
#[derive(Serialize, Debug, PartialEq)]
pub struct AlpacaOrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub time_in_force: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<PriceLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<PriceLevel>,
}

impl AlpacaOrderRequest {
    pub fn from_signal(signal: &Signal) -> Self {
        let side = if signal.action.is_buy_side() { "buy" } else { "sell" };

        let type_ = match signal.order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        };

        let time_in_force = match signal.time_in_force {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Fok => "fok",
        };

        let take_profit = signal.take_profit.map(|p| PriceLevel {
            limit_price: Some(p.to_string()),
            stop_price: None,
        });
        let stop_loss = signal.stop_loss.map(|p| PriceLevel {
            limit_price: None,
            stop_price: Some(p.to_string()),
        });

        // Bracket needs both legs; a single protective leg is one-triggers-other.
        let order_class = match (&take_profit, &stop_loss) {
            (Some(_), Some(_)) => Some("bracket".to_string()),
            (Some(_), None) | (None, Some(_)) => Some("oto".to_string()),
            (None, None) => None,
        };

        Self {
            symbol: signal.symbol.clone(),
            qty: signal.quantity.to_string(),
            side: side.to_string(),
            type_: type_.to_string(),
            time_in_force: time_in_force.to_string(),
            limit_price: signal.limit_price.map(|p| p.to_string()),
            stop_price: signal.stop_price.map(|p| p.to_string()),
            order_class,
            take_profit,
            stop_loss,
        }
    }
}

/// Maps Alpaca's order status vocabulary onto the canonical status.
pub fn map_alpaca_status(native: &str) -> ExecutionStatus {
    match native {
        "filled" => ExecutionStatus::Filled,
        "partially_filled" => ExecutionStatus::PartiallyFilled,
        "canceled" | "expired" | "done_for_day" | "replaced" => ExecutionStatus::Cancelled,
        "rejected" | "suspended" => ExecutionStatus::Rejected,
        // new, accepted, pending_new, accepted_for_bidding, held, calculated, ...
        _ => ExecutionStatus::Pending,
    }
}

/// Alpaca REST destination. One executor serves every configured account.
#[derive(Clone)]
pub struct AlpacaExecutor {
    client: Client,
    config: AlpacaConfig,
}

impl AlpacaExecutor {
    pub fn new(config: AlpacaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn credentials(&self, destination: &AccountRef) -> ExecutorResult<&AlpacaCredentials> {
        self.config
            .accounts
            .get(&destination.account_id)
            .ok_or_else(|| ExecutorError::UnknownAccount {
                account: destination.to_string(),
            })
    }

    fn outcome_from_order(raw: &Value) -> ExecutorOutcome {
        let id = raw
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let native = raw
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let filled_qty = raw
            .get("filled_qty")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .map(|q| q.floor())
            .filter(|q| *q >= 0.0 && *q <= f64::from(u32::MAX))
            .map(|q| q as u32)
            .unwrap_or(0);
        let filled_avg_price = raw
            .get("filled_avg_price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok());

        let status = map_alpaca_status(&native);
        ExecutorOutcome::accepted(id, native, status).with_fill(filled_qty, filled_avg_price)
    }
}

#[async_trait]
impl DestinationExecutor for AlpacaExecutor {
    fn platform(&self) -> &str {
        &self.config.platform
    }

    async fn execute(&self, signal: &Signal, destination: &AccountRef) -> ExecutorResult<ExecutorOutcome> {
        let creds = self.credentials(destination)?;
        let url = format!("{}/v2/orders", self.config.base_url);
        let order = AlpacaOrderRequest::from_signal(signal);

        info!(
            "[ALPACA] {} submitting {} {} x{} ({})",
            destination, order.side, order.symbol, order.qty, order.type_
        );

        let resp = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &creds.api_key)
            .header(API_SECRET_HEADER, &creds.secret_key)
            .json(&order)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if status == StatusCode::UNAUTHORIZED || status.is_server_error() {
            return Err(ExecutorError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        if status.is_client_error() {
            // 403 insufficient buying power, 422 invalid order, ...
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(text);
            warn!("[ALPACA] {} rejected order ({}): {}", destination, status, message);
            return Ok(ExecutorOutcome::rejected(status.as_u16().to_string(), message));
        }

        let raw: Value = serde_json::from_str(&text)?;
        if raw.get("id").is_none() {
            return Err(ExecutorError::Unreachable(format!(
                "order response without id: {}",
                text
            )));
        }
        Ok(Self::outcome_from_order(&raw))
    }
}
