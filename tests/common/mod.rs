#![allow(dead_code)]

use async_trait::async_trait;
use smsrelay::{
    ConnectivityMonitor, DeliveryLedger, DispatchConfig, DispatchEngine, LedgerEntry,
    MessageRequest, NativeSender, Outcome, RelayError, RemoteQueueClient, RequestId,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted backend: every fetch returns the current batch (or error).
pub struct MockRemote {
    batch: Mutex<smsrelay::Result<Vec<MessageRequest>>>,
    fetches: AtomicUsize,
    pushes: Mutex<Vec<(RequestId, Outcome)>>,
    fail_pushes: AtomicBool,
}

impl MockRemote {
    pub fn new(batch: Vec<MessageRequest>) -> Arc<Self> {
        Arc::new(Self {
            batch: Mutex::new(Ok(batch)),
            fetches: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
            fail_pushes: AtomicBool::new(false),
        })
    }

    pub fn failing(error: &str) -> Arc<Self> {
        let remote = Self::new(vec![]);
        *remote.batch.lock().unwrap() = Err(RelayError::Fetch(error.to_string()));
        remote
    }

    pub fn set_batch(&self, batch: Vec<MessageRequest>) {
        *self.batch.lock().unwrap() = Ok(batch);
    }

    pub fn fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> Vec<(RequestId, Outcome)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteQueueClient for MockRemote {
    async fn fetch_pending(&self) -> smsrelay::Result<Vec<MessageRequest>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.batch.lock().unwrap().clone()
    }

    async fn push_status(&self, id: &RequestId, outcome: Outcome) -> smsrelay::Result<()> {
        self.pushes.lock().unwrap().push((id.clone(), outcome));
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(RelayError::Push("backend returned 500".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SendCall {
    pub phone_number: String,
    pub body: String,
    pub at: Instant,
}

/// Scripted device sender. Outcomes are queued per phone number; once a
/// script runs out the send succeeds, unless the number always fails.
pub struct MockSender {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    always_fail: Mutex<HashSet<String>>,
    calls: Mutex<Vec<SendCall>>,
    latency: Duration,
    disconnect_after: Mutex<Option<(usize, ConnectivityMonitor)>>,
}

impl MockSender {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            always_fail: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            latency,
            disconnect_after: Mutex::new(None),
        })
    }

    pub fn script(&self, phone_number: &str, outcomes: &[bool]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(phone_number.to_string(), outcomes.iter().copied().collect());
    }

    pub fn fail_always(&self, phone_number: &str) {
        self.always_fail
            .lock()
            .unwrap()
            .insert(phone_number.to_string());
    }

    /// Mark `monitor` unreachable once `calls` sends have completed.
    pub fn disconnect_after(&self, calls: usize, monitor: ConnectivityMonitor) {
        *self.disconnect_after.lock().unwrap() = Some((calls, monitor));
    }

    pub fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, phone_number: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.phone_number == phone_number)
            .count()
    }
}

#[async_trait]
impl NativeSender for MockSender {
    async fn send(&self, phone_number: &str, body: &str) -> smsrelay::Result<()> {
        let total = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(SendCall {
                phone_number: phone_number.to_string(),
                body: body.to_string(),
                at: Instant::now(),
            });
            calls.len()
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        // Fires once, on the send that reaches the threshold.
        let disconnect = {
            let mut slot = self.disconnect_after.lock().unwrap();
            match slot.as_ref() {
                Some((after, _)) if total >= *after => slot.take(),
                _ => None,
            }
        };
        if let Some((_, monitor)) = disconnect {
            monitor.set_reachable(false);
        }

        if self.always_fail.lock().unwrap().contains(phone_number) {
            return Err(RelayError::SendFailed("generic failure".to_string()));
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(phone_number)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(false) => Err(RelayError::SendFailed("radio off".to_string())),
            _ => Ok(()),
        }
    }
}

pub fn fast_config() -> DispatchConfig {
    DispatchConfig {
        base_delay: Duration::from_secs(5),
        chunk_size: 10,
        chunk_delay: Duration::from_secs(30),
        max_retries: 3,
        retry_backoff: Duration::from_secs(2),
    }
}

pub fn engine_with(
    remote: Arc<MockRemote>,
    sender: Arc<MockSender>,
    ledger: Arc<DeliveryLedger>,
    connectivity: ConnectivityMonitor,
    config: DispatchConfig,
) -> Arc<DispatchEngine> {
    Arc::new(DispatchEngine::new(
        remote,
        sender,
        ledger,
        connectivity,
        config,
    ))
}

pub fn pending(id: i64, phone_number: &str) -> MessageRequest {
    MessageRequest::pending(id, phone_number, &format!("message {}", id))
}

pub fn settled(id: i64, phone_number: &str, outcome: Outcome) -> LedgerEntry {
    LedgerEntry::from_request(&pending(id, phone_number), outcome, 1)
}
