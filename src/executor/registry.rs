use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, ExecutorConfig};
use crate::error::ConfigError;

use super::{
    alpaca::AlpacaExecutor,
    paper::PaperExecutor,
    traits::DestinationExecutor,
    webhook::WebhookExecutor,
};

/// Destination executors keyed by platform tag (case-insensitive).
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn DestinationExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn DestinationExecutor>) -> Result<(), ConfigError> {
        let key = executor.platform().to_lowercase();
        if self.executors.contains_key(&key) {
            return Err(ConfigError::DuplicateExecutor { platform: key });
        }
        self.executors.insert(key, executor);
        Ok(())
    }

    pub fn with(mut self, executor: Arc<dyn DestinationExecutor>) -> Result<Self, ConfigError> {
        self.register(executor)?;
        Ok(self)
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn DestinationExecutor>> {
        self.executors.get(&platform.to_lowercase()).cloned()
    }

    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.executors.keys().cloned().collect();
        platforms.sort();
        platforms
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

pub fn build_registry(config: &AppConfig) -> Result<ExecutorRegistry, ConfigError> {
    let mut registry = ExecutorRegistry::new();

    for executor in &config.executors {
        let built: Arc<dyn DestinationExecutor> = match executor {
            ExecutorConfig::Paper(cfg) => Arc::new(PaperExecutor::new(cfg.clone())),
            ExecutorConfig::Alpaca(cfg) => Arc::new(AlpacaExecutor::new(cfg.clone())),
            ExecutorConfig::Webhook(cfg) => Arc::new(WebhookExecutor::new(cfg.clone())),
        };
        info!("[REGISTRY] {} executor registered", built.platform());
        registry.register(built)?;
    }

    Ok(registry)
}
