use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::Path;

use crate::constants::{alpaca, dispatch};
use crate::error::ConfigError;
use crate::routing::RoutingRule;

#[derive(Clone, Debug, Deserialize)]
pub struct DispatchConfig {
    /// Deadline for the whole fan-out of one signal.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            event_bus_capacity: default_bus_capacity(),
        }
    }
}

fn default_deadline_ms() -> u64 {
    dispatch::DEFAULT_DEADLINE_MS
}

fn default_bus_capacity() -> usize {
    dispatch::DEFAULT_EVENT_BUS_CAPACITY
}

#[derive(Clone, Debug, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_paper_platform")]
    pub platform: String,
    /// Fill prices for market orders, by symbol.
    #[serde(default)]
    pub reference_prices: HashMap<String, f64>,
    #[serde(default)]
    pub reject_symbols: HashSet<String>,
    /// Simulated round-trip latency.
    #[serde(default)]
    pub latency_ms: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            platform: default_paper_platform(),
            reference_prices: HashMap::new(),
            reject_symbols: HashSet::new(),
            latency_ms: 0,
        }
    }
}

fn default_paper_platform() -> String {
    "paper".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct AlpacaCredentials {
    pub api_key: String,
    pub secret_key: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AlpacaConfig {
    #[serde(default = "default_alpaca_platform")]
    pub platform: String,
    #[serde(default = "default_alpaca_base_url")]
    pub base_url: String,
    /// Credentials by destination account id.
    #[serde(default)]
    pub accounts: HashMap<String, AlpacaCredentials>,
}

fn default_alpaca_platform() -> String {
    "alpaca".to_string()
}

fn default_alpaca_base_url() -> String {
    alpaca::PAPER_BASE_URL.to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebhookConfig {
    pub platform: String,
    pub url: String,
    /// Sent as a shared-secret header when present.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutorConfig {
    Paper(PaperConfig),
    Alpaca(AlpacaConfig),
    Webhook(WebhookConfig),
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub executors: Vec<ExecutorConfig>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // Strip BOM if present
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let content = expand_env(content)?;

        let config: AppConfig = serde_yaml::from_str(&content)?;
        for rule in &config.rules {
            rule.validate()?;
        }
        Ok(config)
    }
}

/// Replaces `${NAME}` references with the value of environment variable `NAME`.
///
/// Comment lines are copied through untouched.
pub fn expand_env(content: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            out.push_str(line);
        } else {
            expand_line(line, &mut out)?;
        }
    }
    Ok(out)
}

fn expand_line(line: &str, out: &mut String) -> Result<(), ConfigError> {
    let mut rest = line;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated reference, keep literally
            out.push_str(&rest[start..]);
            return Ok(());
        };
        let name = &after[..end];
        let value = env::var(name).map_err(|_| ConfigError::MissingEnv {
            name: name.to_string(),
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(())
}
