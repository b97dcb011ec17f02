//! In-process simulated destination. Fills immediately unless told to reject.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::config::PaperConfig;
use crate::signal::{AccountRef, OrderType, Signal};

use super::traits::{DestinationExecutor, ExecutorOutcome, ExecutorResult};

#[derive(Clone)]
pub struct PaperExecutor {
    config: PaperConfig,
    orders: Arc<DashMap<AccountRef, Vec<Signal>>>,
}

impl PaperExecutor {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            config,
            orders: Arc::new(DashMap::new()),
        }
    }

    /// Signals accepted for `account`, in arrival order.
    pub fn orders_for(&self, account: &AccountRef) -> Vec<Signal> {
        self.orders
            .get(account)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn fill_price(&self, signal: &Signal) -> Option<f64> {
        match signal.order_type {
            OrderType::Limit | OrderType::StopLimit => signal.limit_price,
            OrderType::Stop => signal.stop_price,
            OrderType::Market => self.config.reference_prices.get(&signal.symbol).copied(),
        }
    }
}

#[async_trait]
impl DestinationExecutor for PaperExecutor {
    fn platform(&self) -> &str {
        &self.config.platform
    }

    async fn execute(&self, signal: &Signal, destination: &AccountRef) -> ExecutorResult<ExecutorOutcome> {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        if self.config.reject_symbols.contains(&signal.symbol) {
            info!("[PAPER] {} rejects {} {}", destination, signal.action, signal.symbol);
            return Ok(ExecutorOutcome::rejected(
                "rejected",
                format!("symbol {} not tradable on paper account", signal.symbol),
            ));
        }

        let order_id = format!("paper-{}", Uuid::new_v4());
        let price = self.fill_price(signal);
        info!(
            "[PAPER] {} fills {} {} x{} @ {:?}",
            destination, signal.action, signal.symbol, signal.quantity, price
        );

        self.orders
            .entry(destination.clone())
            .or_default()
            .push(signal.clone());

        Ok(ExecutorOutcome::filled(order_id, signal.quantity, price))
    }
}
