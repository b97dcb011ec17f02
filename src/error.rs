//! Error types for the signal copier
//!
//! Per-rule failures never escape the dispatcher as errors; they become
//! execution records. Only `DispatchError` aborts a whole dispatch call.

use thiserror::Error;
use uuid::Uuid;

use crate::signal::Action;

/// Failures that abort a whole dispatch call.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid signal {signal_id}: {reason}")]
    InvalidSignal { signal_id: Uuid, reason: String },

    #[error("Failed to enumerate routing rules: {0}")]
    RuleSource(#[from] RuleSourceError),
}

/// Raised by the configuration collaborator when rules cannot be listed.
#[derive(Error, Debug)]
pub enum RuleSourceError {
    #[error("Rule store unavailable: {0}")]
    Unavailable(String),

    #[error("Rule {rule_id} is malformed: {reason}")]
    Malformed { rule_id: Uuid, reason: String },
}

/// Transform failures that are fatal for one rule only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Cannot reverse {action} on signal {signal_id}: action and closing flag disagree (closing={is_closing})")]
    ReversalUndefined {
        signal_id: Uuid,
        action: Action,
        is_closing: bool,
    },
}

/// Transport-level failures from a destination executor.
///
/// Broker rejections are not errors; executors report them as outcomes.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No credentials for destination account {account}")]
    UnknownAccount { account: String },

    #[error("Destination unreachable: {0}")]
    Unreachable(String),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: Uuid, reason: String },

    #[error("Duplicate executor for platform '{platform}'")]
    DuplicateExecutor { platform: String },

    #[error("Environment variable {name} referenced by config is not set")]
    MissingEnv { name: String },
}

