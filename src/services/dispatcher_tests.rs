//! Unit tests for the dispatcher - fan-out, partial failure, deadlines, statistics.

#[cfg(test)]
mod dispatcher_tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::bus::EventBus;
    use crate::error::{DispatchError, ExecutorError, RuleSourceError};
    use crate::events::Event;
    use crate::executor::{DestinationExecutor, ExecutorOutcome, ExecutorRegistry, ExecutorResult};
    use crate::records::ExecutionStatus;
    use crate::routing::{InMemoryRuleSource, RoutingRule, RuleSource};
    use crate::services::dispatcher::Dispatcher;
    use crate::services::transform::SkipReason;
    use crate::signal::{AccountRef, Action, Signal};

    #[derive(Clone, Copy)]
    enum Behavior {
        Fill,
        Reject,
        Fail,
        Sleep(u64),
        Panic,
    }

    struct MockExecutor {
        platform: &'static str,
        behavior: Behavior,
        calls: Mutex<Vec<(Signal, AccountRef)>>,
    }

    impl MockExecutor {
        fn new(platform: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                platform,
                behavior,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Signal, AccountRef)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DestinationExecutor for MockExecutor {
        fn platform(&self) -> &str {
            self.platform
        }

        async fn execute(&self, signal: &Signal, destination: &AccountRef) -> ExecutorResult<ExecutorOutcome> {
            self.calls.lock().unwrap().push((signal.clone(), destination.clone()));
            match self.behavior {
                Behavior::Fill => Ok(ExecutorOutcome::filled(
                    format!("{}-{}", self.platform, signal.id),
                    signal.quantity,
                    Some(100.0),
                )),
                Behavior::Reject => Ok(ExecutorOutcome::rejected("rejected", "insufficient margin")),
                Behavior::Fail => Err(ExecutorError::Unreachable("connection refused".to_string())),
                Behavior::Sleep(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(ExecutorOutcome::accepted("slow-1", "new", ExecutionStatus::Pending))
                }
                Behavior::Panic => panic!("executor blew up"),
            }
        }
    }

    struct BrokenRuleSource;

    #[async_trait]
    impl RuleSource for BrokenRuleSource {
        async fn rules_for_source(&self, _source: &AccountRef) -> Result<Vec<Arc<RoutingRule>>, RuleSourceError> {
            Err(RuleSourceError::Unavailable("database down".to_string()))
        }
    }

    fn source() -> AccountRef {
        AccountRef::new("ninjatrader", "SIM101")
    }

    fn to(platform: &str, account: &str) -> AccountRef {
        AccountRef::new(platform, account)
    }

    fn rule(platform: &str, account: &str) -> RoutingRule {
        RoutingRule::new(source(), to(platform, account))
    }

    fn registry(executors: Vec<Arc<MockExecutor>>) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        for executor in executors {
            registry.register(executor).unwrap();
        }
        registry
    }

    fn es_buy(qty: u32) -> Signal {
        Signal::market(source(), "ES", Action::Buy, qty).with_protection(Some(4950.0), Some(5050.0))
    }

    // ============= Routing =============

    #[tokio::test]
    async fn test_inactive_rule_produces_no_record() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let rules = vec![Arc::new(rule("good", "A").inactive())];

        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert!(records.is_empty());
        assert!(good.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rules_for_other_sources_ignored() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let foreign = RoutingRule::new(to("ninjatrader", "OTHER"), to("good", "A"));
        let rules = vec![Arc::new(foreign), Arc::new(rule("good", "B"))];

        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].destination, to("good", "B"));
        assert_eq!(good.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_executor_receives_derived_signal() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let rules = vec![Arc::new(rule("good", "A").with_multiplier(dec!(2)).reversed().without_stop_loss())];
        let signal = es_buy(3);

        let records = dispatcher.dispatch(&signal, &rules).await.unwrap();

        let calls = good.calls();
        assert_eq!(calls.len(), 1);
        let (sent, destination) = &calls[0];
        assert_eq!(destination, &to("good", "A"));
        assert_ne!(sent.id, signal.id);
        assert_eq!(sent.quantity, 6);
        assert_eq!(sent.action, Action::SellShort);
        assert_eq!(sent.stop_loss, None);
        assert_eq!(records[0].derived_signal_id, Some(sent.id));
        assert_eq!(records[0].signal_id, signal.id);
        assert_eq!(records[0].filled_quantity, 6);
    }

    // ============= Partial Failure =============

    #[tokio::test]
    async fn test_one_failing_destination_does_not_affect_others() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let bad = MockExecutor::new("bad", Behavior::Fail);
        let dispatcher = Dispatcher::new(registry(vec![good.clone(), bad]));
        let rules = vec![
            Arc::new(rule("good", "A")),
            Arc::new(rule("bad", "B")),
            Arc::new(rule("good", "C")),
        ];

        let records = dispatcher.dispatch(&es_buy(2), &rules).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].status, ExecutionStatus::Filled);
        assert_eq!(records[1].status, ExecutionStatus::Error);
        assert!(records[1].error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(records[2].status, ExecutionStatus::Filled);
        for (record, rule) in records.iter().zip(&rules) {
            assert_eq!(record.rule_id, rule.id);
        }
    }

    #[tokio::test]
    async fn test_partial_failure_with_skip() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let bad = MockExecutor::new("bad", Behavior::Fail);
        let dispatcher = Dispatcher::new(registry(vec![good, bad]));
        let rules = vec![
            Arc::new(rule("good", "A")),
            Arc::new(rule("bad", "B")),
            Arc::new(rule("good", "C").with_blacklist(["ES"])),
        ];

        let report = dispatcher.dispatch_report(&es_buy(2), &rules).await.unwrap();

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].status, ExecutionStatus::Filled);
        assert_eq!(report.records[1].status, ExecutionStatus::Error);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].rule_id, rules[2].id);
        assert_eq!(report.skipped[0].reason, SkipReason::Blacklisted);
    }

    #[tokio::test]
    async fn test_rejection_is_recorded_not_raised() {
        let picky = MockExecutor::new("picky", Behavior::Reject);
        let dispatcher = Dispatcher::new(registry(vec![picky]));
        let rules = vec![Arc::new(rule("picky", "A"))];

        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Rejected);
        assert_eq!(records[0].error.as_deref(), Some("insufficient margin"));
        assert_eq!(rules[0].stats.snapshot().trades_copied, 0);
    }

    #[tokio::test]
    async fn test_missing_executor_records_error() {
        let dispatcher = Dispatcher::new(ExecutorRegistry::new());
        let rules = vec![Arc::new(rule("tradovate", "A"))];

        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Error);
        assert!(records[0].error.as_deref().unwrap().contains("tradovate"));
        assert!(records[0].derived_signal_id.is_some());
    }

    #[tokio::test]
    async fn test_undefined_reversal_records_error_for_that_rule_only() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let rules = vec![Arc::new(rule("good", "A").reversed()), Arc::new(rule("good", "B"))];
        let mut signal = es_buy(1);
        signal.is_closing = Some(true);

        let records = dispatcher.dispatch(&signal, &rules).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, ExecutionStatus::Error);
        assert!(records[0].error.as_deref().unwrap().contains("Cannot reverse"));
        assert_eq!(records[0].derived_signal_id, None);
        assert_eq!(records[1].status, ExecutionStatus::Filled);
        assert_eq!(good.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reversed_json_sell_without_closing_flag_is_copied() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let rules = vec![Arc::new(rule("good", "A").reversed())];
        let json = r#"{
            "id": "6f1c2a5e-8d7b-4c3a-9e2f-1a2b3c4d5e6f",
            "source": {"platform": "ninjatrader", "account_id": "SIM101"},
            "timestamp": "2026-01-02T14:30:00Z",
            "symbol": "ES",
            "action": "sell",
            "order_type": "market",
            "quantity": 2
        }"#;
        let signal: Signal = serde_json::from_str(json).unwrap();

        let records = dispatcher.dispatch(&signal, &rules).await.unwrap();

        assert_eq!(records[0].status, ExecutionStatus::Filled);
        assert_eq!(records[0].error, None);
        assert_eq!(good.calls()[0].0.action, Action::BuyToCover);
    }

    #[tokio::test]
    async fn test_self_route_records_error() {
        let good = MockExecutor::new("ninjatrader", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let rules = vec![Arc::new(RoutingRule::new(source(), source()))];

        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Error);
        assert!(good.calls().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_executor_is_contained() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let boom = MockExecutor::new("boom", Behavior::Panic);
        let dispatcher = Dispatcher::new(registry(vec![good, boom]));
        let rules = vec![Arc::new(rule("boom", "A")), Arc::new(rule("good", "B"))];

        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, ExecutionStatus::Error);
        assert!(records[0].error.as_deref().unwrap().contains("aborted"));
        assert_eq!(records[1].status, ExecutionStatus::Filled);
    }

    // ============= Concurrency & Deadline =============

    #[tokio::test]
    async fn test_records_follow_rule_order_not_completion_order() {
        let slow = MockExecutor::new("slow", Behavior::Sleep(100));
        let fast = MockExecutor::new("fast", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![slow, fast]));
        let rules = vec![Arc::new(rule("slow", "A")), Arc::new(rule("fast", "B"))];

        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert_eq!(records[0].destination, to("slow", "A"));
        assert_eq!(records[0].status, ExecutionStatus::Pending);
        assert_eq!(records[1].destination, to("fast", "B"));
        assert_eq!(records[1].status, ExecutionStatus::Filled);
    }

    #[tokio::test]
    async fn test_destinations_run_concurrently() {
        let slow = MockExecutor::new("slow", Behavior::Sleep(200));
        let dispatcher = Dispatcher::new(registry(vec![slow]));
        let rules: Vec<_> = (0..5).map(|i| Arc::new(rule("slow", &format!("ACC-{}", i)))).collect();

        let started = std::time::Instant::now();
        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert_eq!(records.len(), 5);
        // Sequential would take ~1s
        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_deadline_turns_slow_destination_into_timeout() {
        let slow = MockExecutor::new("slow", Behavior::Sleep(2_000));
        let fast = MockExecutor::new("fast", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![slow, fast])).with_deadline(Duration::from_millis(100));
        let rules = vec![Arc::new(rule("slow", "A")), Arc::new(rule("fast", "B"))];

        let started = std::time::Instant::now();
        let records = dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(1_500));
        assert_eq!(records[0].status, ExecutionStatus::Error);
        assert_eq!(records[0].error.as_deref(), Some("timeout"));
        assert_eq!(records[1].status, ExecutionStatus::Filled);
        assert_eq!(rules[0].stats.snapshot().trades_copied, 0);
    }

    // ============= Statistics =============

    #[tokio::test]
    async fn test_dropped_dispatch_aborts_in_flight_executions() {
        let slow = MockExecutor::new("slow", Behavior::Sleep(200));
        let dispatcher = Dispatcher::new(registry(vec![slow.clone()]));
        let rules = vec![Arc::new(rule("slow", "A"))];

        let cancelled = tokio::time::timeout(Duration::from_millis(50), dispatcher.dispatch(&es_buy(1), &rules)).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(slow.calls().len(), 1);
        assert_eq!(rules[0].stats.snapshot().trades_copied, 0);
        assert_eq!(rules[0].stats.snapshot().last_trade_at, None);
    }

    #[tokio::test]
    async fn test_statistics_only_updated_on_success() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let bad = MockExecutor::new("bad", Behavior::Fail);
        let dispatcher = Dispatcher::new(registry(vec![good, bad]));
        let ok_rule = Arc::new(rule("good", "A"));
        let failing_rule = Arc::new(rule("bad", "B"));
        let skipped_rule = Arc::new(rule("good", "C").with_whitelist(["NQ"]));
        let rules = vec![ok_rule.clone(), failing_rule.clone(), skipped_rule.clone()];

        dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();
        dispatcher.dispatch(&es_buy(1), &rules).await.unwrap();

        let stats = ok_rule.stats.snapshot();
        assert_eq!(stats.trades_copied, 2);
        assert!(stats.last_trade_at.is_some());
        assert_eq!(failing_rule.stats.snapshot().trades_copied, 0);
        assert_eq!(failing_rule.stats.snapshot().last_trade_at, None);
        assert_eq!(skipped_rule.stats.snapshot().trades_copied, 0);
    }

    #[tokio::test]
    async fn test_concurrent_dispatches_do_not_lose_updates() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Arc::new(Dispatcher::new(registry(vec![good])));
        let shared = Arc::new(rule("good", "A"));
        let rules = Arc::new(vec![shared.clone()]);

        let mut handles = Vec::new();
        for _ in 0..25 {
            let dispatcher = dispatcher.clone();
            let rules = rules.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.dispatch(&es_buy(1), &rules).await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().len(), 1);
        }

        assert_eq!(shared.stats.snapshot().trades_copied, 25);
    }

    // ============= Validation & Rule Lookup =============

    #[tokio::test]
    async fn test_invalid_signal_aborts_dispatch() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let rules = vec![Arc::new(rule("good", "A"))];
        let mut signal = es_buy(1);
        signal.quantity = 0;

        let err = dispatcher.dispatch(&signal, &rules).await.unwrap_err();

        assert!(matches!(err, DispatchError::InvalidSignal { .. }));
        assert!(good.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_from_rejects_invalid_signal() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let store = InMemoryRuleSource::new(vec![Arc::new(rule("good", "A"))]);
        let mut signal = es_buy(1);
        signal.symbol = " ".to_string();

        let err = dispatcher.dispatch_from(&signal, &store).await.unwrap_err();

        assert!(matches!(err, DispatchError::InvalidSignal { .. }));
        assert!(good.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rule_source_failure_aborts_dispatch() {
        let dispatcher = Dispatcher::new(ExecutorRegistry::new());
        let err = dispatcher.dispatch_from(&es_buy(1), &BrokenRuleSource).await.unwrap_err();
        assert!(matches!(err, DispatchError::RuleSource(_)));
    }

    #[tokio::test]
    async fn test_dispatch_from_rule_source() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good]));
        let store = InMemoryRuleSource::new(vec![
            Arc::new(rule("good", "A")),
            Arc::new(RoutingRule::new(to("ninjatrader", "OTHER"), to("good", "B"))),
        ]);

        let report = dispatcher.dispatch_from(&es_buy(1), &store).await.unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].destination, to("good", "A"));
    }

    // ============= Events =============

    #[tokio::test]
    async fn test_events_published_in_order() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let dispatcher = Dispatcher::new(registry(vec![good])).with_event_bus(bus);
        let rules = vec![Arc::new(rule("good", "A").inactive()), Arc::new(rule("good", "B"))];
        let signal = es_buy(1);

        dispatcher.dispatch(&signal, &rules).await.unwrap();

        match rx.recv().await.unwrap() {
            Event::SignalReceived(s) => assert_eq!(s.id, signal.id),
            other => panic!("Expected SignalReceived, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            Event::RuleSkipped { signal_id, skipped } => {
                assert_eq!(signal_id, signal.id);
                assert_eq!(skipped.reason, SkipReason::RuleInactive);
            }
            other => panic!("Expected RuleSkipped, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            Event::Executed(record) => assert_eq!(record.rule_id, rules[1].id),
            other => panic!("Expected Executed, got {:?}", other),
        }
    }

    // ============= End to End =============

    #[tokio::test]
    async fn test_es_buy_whitelisted_copy() {
        let good = MockExecutor::new("good", Behavior::Fill);
        let dispatcher = Dispatcher::new(registry(vec![good.clone()]));
        let rules = vec![Arc::new(rule("good", "A").with_multiplier(dec!(1.0)).with_whitelist(["ES", "NQ"]))];

        let records = dispatcher.dispatch(&es_buy(4), &rules).await.unwrap();

        assert_eq!(records.len(), 1);
        let (sent, _) = &good.calls()[0];
        assert_eq!(sent.quantity, 4);
        assert_eq!(sent.action, Action::Buy);
        assert_eq!(sent.stop_loss, Some(4950.0));
    }
}
