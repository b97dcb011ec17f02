use std::env;
use std::sync::Arc;

use signal_copier::config::AppConfig;
use signal_copier::executor::build_registry;
use signal_copier::services::{DispatchJournal, Dispatcher};
use signal_copier::{EventBus, InMemoryRuleSource, Signal};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    let config_path = env::var("COPIER_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let mut config = AppConfig::load(&config_path)?;

    // Setup Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting signal copier (config: {})", config_path);

    let registry = build_registry(&config)?;
    if registry.is_empty() {
        warn!("⚠️ No executors configured; every copy will be recorded as an error");
    }
    info!("Executors: {:?}", registry.platforms());

    let rules: Vec<_> = std::mem::take(&mut config.rules).into_iter().map(Arc::new).collect();
    info!("Loaded {} routing rules", rules.len());
    let rule_source = InMemoryRuleSource::new(rules);

    let bus = EventBus::new(config.dispatch.event_bus_capacity);
    let journal = DispatchJournal::new();
    let journal_handle = journal.start(&bus);

    let dispatcher = Dispatcher::from_config(registry, &config.dispatch).with_event_bus(bus);

    // Newline-delimited JSON signals, from a file or stdin
    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match env::args().nth(1) {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let signal: Signal = match serde_json::from_str(&line) {
            Ok(signal) => signal,
            Err(e) => {
                error!("❌ Skipping unparseable signal: {}", e);
                continue;
            }
        };

        match dispatcher.dispatch_from(&signal, &rule_source).await {
            Ok(report) => {
                for record in &report.records {
                    println!("{}", serde_json::to_string(record)?);
                }
            }
            Err(e) => error!("❌ Signal {} not dispatched: {}", signal.id, e),
        }
    }

    for rule in rule_source.all() {
        let stats = rule.stats.snapshot();
        info!(
            "Rule {} ({} -> {}): {} trades copied, last at {:?}",
            rule.id, rule.source, rule.destination, stats.trades_copied, stats.last_trade_at
        );
    }

    // Closing the bus lets the journal drain and stop
    drop(dispatcher);
    if let Err(e) = journal_handle.await {
        warn!("Journal task ended abnormally: {}", e);
    }

    let summary = journal.summary();
    info!(
        "Done: {} signals, {} records ({} accepted, {} failed), {} skipped",
        journal.signals_seen(),
        summary.total,
        summary.accepted,
        summary.failed(),
        summary.skipped
    );

    Ok(())
}
