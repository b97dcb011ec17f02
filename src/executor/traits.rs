use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;
use crate::records::ExecutionStatus;
use crate::signal::{AccountRef, Signal};

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// What a destination reported back for one derived signal.
///
/// `status` is already mapped from the broker's own vocabulary, which is kept
/// verbatim in `native_status` for auditing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutcome {
    pub order_id: Option<String>,
    pub native_status: String,
    pub status: ExecutionStatus,
    pub filled_quantity: u32,
    pub fill_price: Option<f64>,
    pub message: Option<String>,
}

impl ExecutorOutcome {
    pub fn accepted(order_id: impl Into<String>, native_status: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            order_id: Some(order_id.into()),
            native_status: native_status.into(),
            status,
            filled_quantity: 0,
            fill_price: None,
            message: None,
        }
    }

    pub fn filled(order_id: impl Into<String>, quantity: u32, price: Option<f64>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            native_status: "filled".to_string(),
            status: ExecutionStatus::Filled,
            filled_quantity: quantity,
            fill_price: price,
            message: None,
        }
    }

    pub fn rejected(native_status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            order_id: None,
            native_status: native_status.into(),
            status: ExecutionStatus::Rejected,
            filled_quantity: 0,
            fill_price: None,
            message: Some(message.into()),
        }
    }

    pub fn with_fill(mut self, quantity: u32, price: Option<f64>) -> Self {
        self.filled_quantity = quantity;
        self.fill_price = price;
        self
    }
}

/// Places derived signals on one broker platform.
///
/// Implementations must be safe to call concurrently for distinct
/// destinations. A broker rejecting the order is an `Ok` outcome with status
/// `Rejected`; `Err` is reserved for transport failures.
#[async_trait]
pub trait DestinationExecutor: Send + Sync {
    /// Platform tag this executor serves, matched against `AccountRef::platform`.
    fn platform(&self) -> &str;

    async fn execute(&self, signal: &Signal, destination: &AccountRef) -> ExecutorResult<ExecutorOutcome>;
}
