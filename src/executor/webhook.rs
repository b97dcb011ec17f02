//! Generic signal relay: posts the derived signal as JSON to a URL.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::constants::webhook::SECRET_HEADER;
use crate::error::ExecutorError;
use crate::records::ExecutionStatus;
use crate::signal::{AccountRef, Signal};

use super::traits::{DestinationExecutor, ExecutorOutcome, ExecutorResult};

#[derive(Serialize, Debug)]
struct WebhookPayload<'a> {
    account_id: &'a str,
    #[serde(flatten)]
    signal: &'a Signal,
}

#[derive(Deserialize, Debug, Default)]
struct WebhookResponse {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    filled_quantity: Option<u32>,
    #[serde(default)]
    fill_price: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

/// Maps the loose status words relays tend to use.
pub fn map_relay_status(native: &str) -> ExecutionStatus {
    match native.to_ascii_lowercase().as_str() {
        "filled" | "executed" => ExecutionStatus::Filled,
        "partially_filled" | "partial" => ExecutionStatus::PartiallyFilled,
        "rejected" | "denied" => ExecutionStatus::Rejected,
        "cancelled" | "canceled" | "expired" => ExecutionStatus::Cancelled,
        "error" | "failed" => ExecutionStatus::Error,
        _ => ExecutionStatus::Pending,
    }
}

#[derive(Clone)]
pub struct WebhookExecutor {
    client: Client,
    config: WebhookConfig,
}

impl WebhookExecutor {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl DestinationExecutor for WebhookExecutor {
    fn platform(&self) -> &str {
        &self.config.platform
    }

    async fn execute(&self, signal: &Signal, destination: &AccountRef) -> ExecutorResult<ExecutorOutcome> {
        let payload = WebhookPayload {
            account_id: &destination.account_id,
            signal,
        };

        let mut req = self.client.post(&self.config.url).json(&payload);
        if let Some(secret) = &self.config.secret {
            req = req.header(SECRET_HEADER, secret);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.is_server_error() {
            return Err(ExecutorError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        if status.is_client_error() {
            warn!("[WEBHOOK] {} refused signal {} ({}): {}", destination, signal.id, status, text);
            return Ok(ExecutorOutcome::rejected(status.as_u16().to_string(), text));
        }

        let body: WebhookResponse = if text.trim().is_empty() {
            WebhookResponse::default()
        } else {
            serde_json::from_str(&text)?
        };

        let native = body.status.unwrap_or_else(|| "accepted".to_string());
        let mapped = map_relay_status(&native);
        info!("[WEBHOOK] {} answered {} for signal {}", destination, native, signal.id);

        Ok(ExecutorOutcome {
            order_id: body.order_id,
            native_status: native,
            status: mapped,
            filled_quantity: body.filled_quantity.unwrap_or(0),
            fill_price: body.fill_price,
            message: body.message,
        })
    }
}
