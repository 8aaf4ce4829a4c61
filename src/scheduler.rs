use crate::connectivity::ConnectivityMonitor;
use crate::dispatch::DispatchEngine;
use crate::types::CycleReport;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Runs the dispatch engine on a fixed cadence.
///
/// Ticks only start a cycle while `Idle` and online. When connectivity comes
/// back and a cycle is overdue, one starts right away instead of waiting
/// for the next tick.
pub struct PollScheduler {
    engine: Arc<DispatchEngine>,
    connectivity: ConnectivityMonitor,
    interval: Duration,
    state: Mutex<SchedulerState>,
    last_started: Mutex<Option<Instant>>,
    last_report: Mutex<Option<CycleReport>>,
    shutdown: Notify,
}

/// Moves `Running` back to `Idle` when a cycle finishes or its future is
/// dropped. A scheduler stopped meanwhile stays `Stopped`.
struct RunningGuard<'a>(&'a Mutex<SchedulerState>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock().unwrap();
        if *state == SchedulerState::Running {
            *state = SchedulerState::Idle;
        }
    }
}

impl PollScheduler {
    pub fn new(engine: Arc<DispatchEngine>, interval: Duration) -> Arc<Self> {
        let connectivity = engine.connectivity().clone();
        Arc::new(Self {
            engine,
            connectivity,
            interval,
            state: Mutex::new(SchedulerState::Idle),
            last_started: Mutex::new(None),
            last_report: Mutex::new(None),
            shutdown: Notify::new(),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.lock().unwrap().clone()
    }

    /// A cycle is due if none has started yet or the last one started at
    /// least one interval ago.
    pub fn is_due(&self) -> bool {
        match *self.last_started.lock().unwrap() {
            Some(started) => started.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Start a cycle now if the scheduler is idle and online. Returns `None`
    /// when the request was declined.
    pub async fn trigger(&self) -> Option<CycleReport> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                SchedulerState::Running => {
                    tracing::debug!("[SCHED] Cycle still running, skipping tick");
                    return None;
                }
                SchedulerState::Stopped => return None,
                SchedulerState::Idle => {}
            }
            if !self.connectivity.is_reachable() {
                tracing::debug!("[SCHED] Offline, skipping tick");
                return None;
            }
            *state = SchedulerState::Running;
            *self.last_started.lock().unwrap() = Some(Instant::now());
        }

        let _running = RunningGuard(&self.state);
        let report = self.engine.run_cycle().await;
        *self.last_report.lock().unwrap() = Some(report.clone());
        Some(report)
    }

    fn spawn_cycle(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.trigger().await;
        });
    }

    /// Scheduler loop. The first tick fires immediately; missed ticks are
    /// skipped. Returns after [`PollScheduler::stop`].
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut reachability = self.connectivity.subscribe();
        reachability.borrow_and_update();

        tracing::info!("[SCHED] Polling every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.spawn_cycle();
                }
                changed = reachability.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let reachable = *reachability.borrow_and_update();
                    if reachable && self.state() == SchedulerState::Idle && self.is_due() {
                        tracing::info!("[SCHED] Back online with a cycle overdue, polling now");
                        self.spawn_cycle();
                    }
                }
                _ = self.shutdown.notified() => {
                    tracing::info!("[SCHED] Scheduler stopped");
                    break;
                }
            }
        }
    }

    /// Stop permanently. An in-flight cycle runs to completion but no new
    /// cycle starts.
    pub fn stop(&self) {
        *self.state.lock().unwrap() = SchedulerState::Stopped;
        self.shutdown.notify_one();
    }
}
