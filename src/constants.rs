//! Application-wide constants and tunables
//!
//! Centralizes hardcoded values so defaults stay in one place.

/// Dispatch defaults
pub mod dispatch {
    /// Deadline for the fan-out of one signal across all destinations
    pub const DEFAULT_DEADLINE_MS: u64 = 5_000;

    /// Broadcast buffer for dispatch events
    pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1_024;

    /// Error text recorded when an executor misses the deadline
    pub const TIMEOUT_MESSAGE: &str = "timeout";
}

/// Alpaca REST constants
pub mod alpaca {
    pub const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";

    pub const API_KEY_HEADER: &str = "APCA-API-KEY-ID";

    pub const API_SECRET_HEADER: &str = "APCA-API-SECRET-KEY";
}

/// Webhook relay constants
pub mod webhook {
    pub const SECRET_HEADER: &str = "X-Signal-Secret";
}

/// Logging event names for structured logging
pub mod events {
    pub const SIGNAL_RECEIVED: &str = "signal_received";
    pub const RULE_SKIPPED: &str = "rule_skipped";
    pub const ORDER_COPIED: &str = "order_copied";
    pub const ORDER_REJECTED: &str = "order_rejected";
    pub const EXECUTOR_FAILED: &str = "executor_failed";
}
