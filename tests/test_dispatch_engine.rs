//! Dispatch engine behaviour: filtering, pacing, retry, reconciliation and
//! failure containment. Runs on paused tokio time so delays are exact.

mod common;

use common::{engine_with, fast_config, pending, settled, MockRemote, MockSender};
use smsrelay::{
    ConnectivityMonitor, CycleStatus, DeliveryLedger, DispatchConfig, MessageRequest, Outcome,
    RequestId, RequestStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn gaps(sender: &MockSender) -> Vec<Duration> {
    let calls = sender.calls();
    calls.windows(2).map(|w| w[1].at - w[0].at).collect()
}

#[tokio::test(start_paused = true)]
async fn sends_pending_requests_and_records_them() {
    let remote = MockRemote::new(vec![pending(1, "+100"), pending(2, "+200")]);
    let sender = MockSender::new();
    let ledger = Arc::new(DeliveryLedger::in_memory());
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(sender.calls().len(), 2);
    assert_eq!(sender.calls()[0].body, "message 1");
    assert_eq!(
        remote.pushes(),
        vec![
            (RequestId::from(1), Outcome::Sent),
            (RequestId::from(2), Outcome::Sent)
        ]
    );
    assert_eq!(ledger.len(), 2);
    assert!(!engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn settled_requests_are_never_sent_again() {
    let remote = MockRemote::new(vec![pending(1, "+100"), pending(2, "+200")]);
    let sender = MockSender::new();
    let ledger = Arc::new(DeliveryLedger::in_memory());
    ledger.record(settled(1, "+100", Outcome::Sent)).unwrap();
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    engine.run_cycle().await;
    assert_eq!(sender.calls_to("+100"), 0);
    assert_eq!(sender.calls_to("+200"), 1);

    // The backend never saw our pushes and keeps listing both as pending.
    for _ in 0..3 {
        let report = engine.run_cycle().await;
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 2);
    }
    assert_eq!(sender.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconciles_status_without_resending() {
    let remote = MockRemote::new(vec![pending(7, "+700")]);
    let sender = MockSender::new();
    let ledger = Arc::new(DeliveryLedger::in_memory());
    ledger.record(settled(7, "+700", Outcome::Sent)).unwrap();
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger,
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.reconciled, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(remote.pushes(), vec![(RequestId::from(7), Outcome::Sent)]);
    assert!(sender.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reconciles_failed_outcome_too() {
    let remote = MockRemote::new(vec![pending(8, "+800")]);
    let sender = MockSender::new();
    let ledger = Arc::new(DeliveryLedger::in_memory());
    ledger.record(settled(8, "+800", Outcome::Failed)).unwrap();
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger,
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    engine.run_cycle().await;

    assert_eq!(remote.pushes(), vec![(RequestId::from(8), Outcome::Failed)]);
    assert!(sender.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn always_failing_request_gets_bounded_attempts() {
    let remote = MockRemote::new(vec![pending(3, "+300")]);
    let sender = MockSender::new();
    sender.fail_always("+300");
    let ledger = Arc::new(DeliveryLedger::in_memory());
    let config = fast_config();
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        config.clone(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.failed, 1);
    assert_eq!(sender.calls_to("+300") as u32, config.max_retries + 1);
    let entry = ledger.get(&RequestId::from(3)).unwrap();
    assert_eq!(entry.outcome, Outcome::Failed);
    assert_eq!(entry.attempts, config.max_retries + 1);
    assert_eq!(remote.pushes(), vec![(RequestId::from(3), Outcome::Failed)]);

    // Fixed backoff between attempts.
    assert!(gaps(&sender).iter().all(|g| *g == config.retry_backoff));
}

#[tokio::test(start_paused = true)]
async fn zero_retries_means_single_attempt() {
    let remote = MockRemote::new(vec![pending(3, "+300")]);
    let sender = MockSender::new();
    sender.fail_always("+300");
    let engine = engine_with(
        remote,
        sender.clone(),
        Arc::new(DeliveryLedger::in_memory()),
        ConnectivityMonitor::new(true),
        DispatchConfig {
            max_retries: 0,
            ..fast_config()
        },
    );

    engine.run_cycle().await;
    assert_eq!(sender.calls_to("+300"), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_then_success_scenario() {
    let remote = MockRemote::new(vec![pending(1, "+100"), pending(2, "+200")]);
    let sender = MockSender::new();
    sender.script("+200", &[false, false, true]);
    let ledger = Arc::new(DeliveryLedger::in_memory());
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.sent, 2);
    assert_eq!(
        ledger.get(&RequestId::from(1)).unwrap().outcome,
        Outcome::Sent
    );
    let second = ledger.get(&RequestId::from(2)).unwrap();
    assert_eq!(second.outcome, Outcome::Sent);
    assert_eq!(second.attempts, 3);
    assert_eq!(remote.pushes().len(), 2);
    assert_eq!(sender.calls_to("+200"), 3);
}

#[tokio::test(start_paused = true)]
async fn small_batch_pacing_grows_with_position() {
    let batch: Vec<MessageRequest> = (1..=4).map(|i| pending(i, &format!("+{}", i))).collect();
    let remote = MockRemote::new(batch);
    let sender = MockSender::new();
    let config = fast_config();
    let engine = engine_with(
        remote,
        sender.clone(),
        Arc::new(DeliveryLedger::in_memory()),
        ConnectivityMonitor::new(true),
        config.clone(),
    );

    engine.run_cycle().await;

    let calls = sender.calls();
    assert_eq!(calls.len(), 4);
    let base = config.base_delay;
    assert_eq!(gaps(&sender), vec![base, base * 2, base * 3]);
    assert!(calls[3].at - calls[0].at >= base * 3);
}

#[tokio::test(start_paused = true)]
async fn large_batch_pacing_uses_chunks() {
    let batch: Vec<MessageRequest> = (1..=5).map(|i| pending(i, &format!("+{}", i))).collect();
    let remote = MockRemote::new(batch);
    let sender = MockSender::new();
    let config = DispatchConfig {
        base_delay: Duration::from_secs(1),
        chunk_size: 2,
        chunk_delay: Duration::from_secs(10),
        ..fast_config()
    };
    let engine = engine_with(
        remote,
        sender.clone(),
        Arc::new(DeliveryLedger::in_memory()),
        ConnectivityMonitor::new(true),
        config,
    );

    engine.run_cycle().await;

    let secs: Vec<u64> = gaps(&sender).iter().map(|g| g.as_secs()).collect();
    assert_eq!(secs, vec![1, 10, 1, 10]);
}

#[tokio::test(start_paused = true)]
async fn fetch_error_changes_nothing() {
    let remote = MockRemote::failing("connection refused");
    let sender = MockSender::new();
    let ledger = Arc::new(DeliveryLedger::in_memory());
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.status, CycleStatus::FetchFailed);
    assert_eq!(report.dispatched(), 0);
    assert!(ledger.is_empty());
    assert!(sender.calls().is_empty());
    assert!(remote.pushes().is_empty());
    assert!(!engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn offline_cycle_is_a_noop() {
    let remote = MockRemote::new(vec![pending(1, "+100")]);
    let sender = MockSender::new();
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        Arc::new(DeliveryLedger::in_memory()),
        ConnectivityMonitor::new(false),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Unreachable);
    assert_eq!(remote.fetch_count(), 0);
    assert!(sender.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn overlapping_cycle_is_a_noop() {
    let remote = MockRemote::new(vec![pending(1, "+100")]);
    let sender = MockSender::with_latency(Duration::from_secs(10));
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        Arc::new(DeliveryLedger::in_memory()),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run_cycle().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(engine.is_running());

    let second = engine.run_cycle().await;
    assert_eq!(second.status, CycleStatus::AlreadyRunning);

    let first = first.await.unwrap();
    assert_eq!(first.sent, 1);
    assert_eq!(remote.fetch_count(), 1);
    assert_eq!(sender.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_in_one_fetch_are_sent_once() {
    let remote = MockRemote::new(vec![pending(5, "+500"), pending(5, "+500")]);
    let sender = MockSender::new();
    let engine = engine_with(
        remote,
        sender.clone(),
        Arc::new(DeliveryLedger::in_memory()),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(sender.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_pending_requests_are_ignored() {
    let mut sent = pending(1, "+100");
    sent.status = RequestStatus::Sent;
    let mut failed = pending(2, "+200");
    failed.status = RequestStatus::Failed;
    let mut unknown = pending(3, "+300");
    unknown.status = RequestStatus::Other;

    let remote = MockRemote::new(vec![sent, failed, unknown]);
    let sender = MockSender::new();
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        Arc::new(DeliveryLedger::in_memory()),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(report.dispatched() + report.skipped, 0);
    assert!(sender.calls().is_empty());
    assert!(remote.pushes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn push_failures_do_not_stop_the_batch() {
    let remote = MockRemote::new(vec![pending(1, "+100"), pending(2, "+200")]);
    remote.fail_pushes(true);
    let sender = MockSender::new();
    let ledger = Arc::new(DeliveryLedger::in_memory());
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let report = engine.run_cycle().await;
    assert_eq!(report.sent, 2);
    assert_eq!(ledger.len(), 2);

    // Next cycle heals the backend through reconciliation.
    remote.fail_pushes(false);
    let report = engine.run_cycle().await;
    assert_eq!(report.reconciled, 2);
    assert_eq!(sender.calls().len(), 2);
    assert_eq!(remote.pushes().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn persist_failure_is_not_fatal() {
    let temp_dir = tempfile::tempdir().unwrap();
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let ledger = Arc::new(DeliveryLedger::open(&blocker.join("ledger.json")).unwrap());

    let remote = MockRemote::new(vec![pending(1, "+100"), pending(2, "+200")]);
    let sender = MockSender::new();
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    assert_eq!(report.sent, 2);
    assert_eq!(remote.pushes().len(), 2);
    assert!(ledger.is_empty());
}

#[tokio::test(start_paused = true)]
async fn connectivity_loss_defers_the_rest() {
    let batch: Vec<MessageRequest> = (1..=4).map(|i| pending(i, &format!("+{}", i))).collect();
    let remote = MockRemote::new(batch);
    let sender = MockSender::new();
    let connectivity = ConnectivityMonitor::new(true);
    sender.disconnect_after(2, connectivity.clone());
    let ledger = Arc::new(DeliveryLedger::in_memory());
    let engine = engine_with(
        remote,
        sender.clone(),
        ledger.clone(),
        connectivity.clone(),
        fast_config(),
    );

    let report = engine.run_cycle().await;

    // The second send was in progress when the link dropped and finished.
    assert_eq!(report.sent, 2);
    assert_eq!(report.deferred, 2);
    assert_eq!(sender.calls().len(), 2);
    assert!(!ledger.has(&RequestId::from(3)));

    connectivity.set_reachable(true);
    let report = engine.run_cycle().await;
    assert_eq!(report.sent, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(ledger.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn shutdown_defers_the_rest_without_waiting_out_pacing() {
    let batch: Vec<MessageRequest> = (1..=4).map(|i| pending(i, &format!("+{}", i))).collect();
    let remote = MockRemote::new(batch);
    let sender = MockSender::new();
    let ledger = Arc::new(DeliveryLedger::in_memory());
    let engine = engine_with(
        remote,
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        DispatchConfig {
            base_delay: Duration::from_secs(30),
            ..fast_config()
        },
    );

    let started = tokio::time::Instant::now();
    let cycle = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run_cycle().await }
    });

    // First send is done; the cycle is now in the 30s wait before the second.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sender.calls().len(), 1);
    engine.shutdown();

    let report = cycle.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(report.sent, 1);
    assert_eq!(report.deferred, 3);
    assert_eq!(sender.calls().len(), 1);
    assert_eq!(ledger.len(), 1);
    assert!(engine.is_shutting_down());
    assert!(!engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_send_in_progress_finish() {
    let remote = MockRemote::new(vec![pending(1, "+100"), pending(2, "+200")]);
    let sender = MockSender::with_latency(Duration::from_secs(10));
    let ledger = Arc::new(DeliveryLedger::in_memory());
    let engine = engine_with(
        remote.clone(),
        sender.clone(),
        ledger.clone(),
        ConnectivityMonitor::new(true),
        fast_config(),
    );

    let cycle = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run_cycle().await }
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    engine.shutdown();

    let report = cycle.await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.deferred, 1);
    assert!(ledger.has(&RequestId::from(1)));
    assert_eq!(remote.pushes(), vec![(RequestId::from(1), Outcome::Sent)]);
}
