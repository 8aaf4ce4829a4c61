use super::pacing;
use crate::config::DispatchConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::ledger::DeliveryLedger;
use crate::remote::RemoteQueueClient;
use crate::sender::NativeSender;
use crate::types::{CycleReport, CycleStatus, LedgerEntry, MessageRequest, Outcome, RequestId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::Instrument;

/// Drives dispatch cycles against the remote queue.
///
/// Requests are sent one at a time in fetch order with pacing delays in
/// between. The engine is the only writer of the ledger, and at most one
/// cycle runs per engine at any time.
pub struct DispatchEngine {
    remote: Arc<dyn RemoteQueueClient>,
    sender: Arc<dyn NativeSender>,
    ledger: Arc<DeliveryLedger>,
    connectivity: ConnectivityMonitor,
    config: DispatchConfig,
    in_flight: AtomicBool,
    shutting_down: AtomicBool,
    shutdown: Notify,
}

/// Clears the in-flight flag when a cycle ends, including when its future
/// is dropped half way.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DispatchEngine {
    pub fn new(
        remote: Arc<dyn RemoteQueueClient>,
        sender: Arc<dyn NativeSender>,
        ledger: Arc<DeliveryLedger>,
        connectivity: ConnectivityMonitor,
        config: DispatchConfig,
    ) -> Self {
        Self {
            remote,
            sender,
            ledger,
            connectivity,
            config,
            in_flight: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<DeliveryLedger> {
        &self.ledger
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Ask a running cycle to stop before its next request. The send in
    /// progress (including its retries) still completes and is recorded;
    /// the rest of the batch is deferred. Pacing waits are cut short.
    /// Permanent: later items in any cycle are deferred too.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Sleep for `delay` unless shutdown is requested first.
    async fn pace(&self, delay: Duration) {
        if delay.is_zero() || self.is_shutting_down() {
            return;
        }
        let notified = self.shutdown.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutting_down() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = notified => {}
        }
    }

    /// Run one dispatch cycle. Never fails: per-request problems end up in
    /// the ledger, the status push or the log, and the report says what
    /// happened.
    pub async fn run_cycle(&self) -> CycleReport {
        if !self.connectivity.is_reachable() {
            tracing::debug!("[DISPATCH] Offline, skipping cycle");
            return CycleReport::empty(CycleStatus::Unreachable);
        }

        let Some(_guard) = CycleGuard::acquire(&self.in_flight) else {
            tracing::debug!("[DISPATCH] A cycle is already running, skipping");
            return CycleReport::empty(CycleStatus::AlreadyRunning);
        };

        let cycle_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("dispatch_cycle", cycle = %cycle_id);
        self.process_queue().instrument(span).await
    }

    async fn process_queue(&self) -> CycleReport {
        tracing::debug!("[DISPATCH] Checking for pending messages");

        let requests = match self.remote.fetch_pending().await {
            Ok(requests) => requests,
            Err(e) => {
                tracing::warn!("[DISPATCH] {}; will retry on the next cycle", e);
                return CycleReport::empty(CycleStatus::FetchFailed);
            }
        };

        let mut report = CycleReport::empty(CycleStatus::Completed);
        let mut attempted: HashSet<RequestId> = HashSet::new();
        let mut batch: Vec<&MessageRequest> = Vec::new();

        for request in requests.iter().filter(|r| r.is_pending()) {
            if !attempted.insert(request.id.clone()) {
                tracing::warn!(
                    "[DISPATCH] Request {} listed twice in one fetch, ignoring the duplicate",
                    request.id
                );
                report.skipped += 1;
                continue;
            }

            if let Some(entry) = self.ledger.get(&request.id) {
                report.skipped += 1;
                self.reconcile(&entry).await;
                report.reconciled += 1;
                continue;
            }

            batch.push(request);
        }

        if batch.is_empty() {
            tracing::debug!("[DISPATCH] Nothing to send");
            return report;
        }

        tracing::info!("[DISPATCH] {} pending message(s) to send", batch.len());

        let batch_len = batch.len();
        for (index, request) in batch.into_iter().enumerate() {
            self.pace(pacing::delay_before(&self.config, index, batch_len))
                .await;

            if self.is_shutting_down() {
                report.deferred = batch_len - index;
                tracing::info!(
                    "[DISPATCH] Shutting down, deferring {} request(s) to the next run",
                    report.deferred
                );
                break;
            }

            if !self.connectivity.is_reachable() {
                report.deferred = batch_len - index;
                tracing::warn!(
                    "[DISPATCH] Connectivity lost, deferring {} request(s) to a later cycle",
                    report.deferred
                );
                break;
            }

            match self.dispatch_one(request).await {
                Outcome::Sent => report.sent += 1,
                Outcome::Failed => report.failed += 1,
            }
        }

        tracing::info!(
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            reconciled = report.reconciled,
            deferred = report.deferred,
            "[DISPATCH] Cycle complete"
        );

        report
    }

    /// Send one request with bounded retry, then record and report the
    /// terminal outcome.
    async fn dispatch_one(&self, request: &MessageRequest) -> Outcome {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempts: u32 = 0;

        tracing::info!(
            "[DISPATCH] Sending request {} to {}",
            request.id,
            request.phone_number
        );

        let outcome = loop {
            attempts += 1;
            match self
                .sender
                .send(&request.phone_number, &request.body)
                .await
            {
                Ok(()) => break Outcome::Sent,
                Err(e) if attempts < max_attempts => {
                    tracing::warn!(
                        "[DISPATCH] Request {} attempt {}/{} failed: {}, retrying in {:?}",
                        request.id,
                        attempts,
                        max_attempts,
                        e,
                        self.config.retry_backoff
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) => {
                    tracing::error!(
                        "[DISPATCH] Request {} failed after {} attempt(s): {}",
                        request.id,
                        attempts,
                        e
                    );
                    break Outcome::Failed;
                }
            }
        };

        if let Err(e) = self
            .ledger
            .record(LedgerEntry::from_request(request, outcome, attempts))
        {
            tracing::error!(
                "[DISPATCH] Could not record request {} as {}: {}",
                request.id,
                outcome,
                e
            );
        }

        match self.remote.push_status(&request.id, outcome).await {
            Ok(()) => tracing::info!("[DISPATCH] Request {} marked {}", request.id, outcome),
            Err(e) => tracing::warn!(
                "[DISPATCH] Request {} is {} locally but the status push failed: {}",
                request.id,
                outcome,
                e
            ),
        }

        outcome
    }

    /// The ledger already settled this request but the backend still lists
    /// it as pending: push the recorded outcome again instead of resending.
    async fn reconcile(&self, entry: &LedgerEntry) {
        tracing::info!(
            "[DISPATCH] Request {} already {} locally, re-pushing status",
            entry.id,
            entry.outcome
        );
        if let Err(e) = self.remote.push_status(&entry.id, entry.outcome).await {
            tracing::warn!(
                "[DISPATCH] Reconciliation push for request {} failed: {}",
                entry.id,
                e
            );
        }
    }
}
