use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Publish point for network reachability.
///
/// Backed by a watch channel: a subscriber sees the latest value as soon as
/// it subscribes, then every subsequent change. Publishing the current
/// value again does not wake subscribers.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_reachable: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_reachable);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record a reachability observation from the host platform or a probe.
    pub fn set_reachable(&self, reachable: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            if reachable {
                tracing::info!("[NET] Connectivity restored");
            } else {
                tracing::warn!("[NET] Connectivity lost");
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Invoke `callback` with the current value, then on every change.
    /// The task ends once every clone of this monitor is dropped.
    pub fn on_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(bool) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            let current = *rx.borrow_and_update();
            callback(current);
            while rx.changed().await.is_ok() {
                let value = *rx.borrow_and_update();
                callback(value);
            }
        })
    }
}

/// Probes the remote endpoint with a plain GET. Any HTTP response, even an
/// error status, proves the server is reachable; transport errors and
/// timeouts do not.
pub struct ReachabilityProbe {
    url: String,
    http_client: reqwest::Client,
}

impl ReachabilityProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            url: url.into(),
            http_client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn probe(&self) -> bool {
        match self.http_client.get(&self.url).send().await {
            Ok(response) => {
                tracing::debug!("[NET] Probe {} -> {}", self.url, response.status());
                true
            }
            Err(e) => {
                tracing::debug!("[NET] Probe {} failed: {}", self.url, e);
                false
            }
        }
    }
}

/// Probe on a fixed interval and feed the result into `monitor` until
/// `shutdown` is notified. The first probe runs immediately.
pub async fn run_probe_loop(
    probe: ReachabilityProbe,
    monitor: ConnectivityMonitor,
    interval: Duration,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reachable = probe.probe().await;
                monitor.set_reachable(reachable);
            }
            _ = shutdown.notified() => {
                tracing::info!("[NET] Probe loop shutting down");
                break;
            }
        }
    }
}
