//! Liveness monitor — detects a dead comet channel and forces a reboot.
//!
//! Sampling is driven by an activity signal ([`ActivityHandle::touch`])
//! that is independent of the comet loop's own timers, since those timers
//! may be exactly what stalled (e.g. the host slept). Samples closer than
//! `poll_interval` to the previous one are skipped outright. All times come
//! from the [`CometState`] clock, which is wall time.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::comet::CometState;
use crate::error::{AppError, ClientError};
use crate::report::{ErrorSink, report_fault};
use crate::runtime::{Component, ComponentFuture};
use crate::session::{ExitHandle, SessionExit};

/// Outcome of one activity sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Too soon after the previous sample; nothing checked.
    Skipped,
    Alive,
    Dead { silent: Duration },
}

/// Pure sampling logic, kept separate from the task for testing.
#[derive(Debug)]
pub struct LivenessMonitor {
    state: Arc<CometState>,
    poll_interval: Duration,
    /// Comet hold time plus the response window.
    threshold: Duration,
    last_sample: SystemTime,
}

impl LivenessMonitor {
    pub fn new(
        state: Arc<CometState>,
        poll_interval: Duration,
        comet_timeout: Duration,
        response_window: Duration,
        now: SystemTime,
    ) -> Self {
        Self {
            state,
            poll_interval,
            threshold: comet_timeout + response_window,
            last_sample: now,
        }
    }

    pub fn now(&self) -> SystemTime {
        self.state.now()
    }

    /// A wall clock set backwards reads as no time passed.
    pub fn sample(&mut self, now: SystemTime) -> Verdict {
        if elapsed(self.last_sample, now) <= self.poll_interval {
            return Verdict::Skipped;
        }
        self.last_sample = now;

        let silent = elapsed(self.state.last_response(), now);
        if silent > self.threshold {
            Verdict::Dead { silent }
        } else {
            Verdict::Alive
        }
    }
}

fn elapsed(since: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(since).unwrap_or_default()
}

// ── Activity signal ──────────────────────────────────────────────────────────

/// Cloneable sender for user-activity signals.
#[derive(Clone)]
pub struct ActivityHandle {
    tx: mpsc::Sender<()>,
}

impl ActivityHandle {
    /// Signal activity. Coarse by nature: dropped when the monitor is busy.
    pub fn touch(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Create the activity channel feeding a [`LivenessService`].
pub fn activity_channel() -> (ActivityHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(8);
    (ActivityHandle { tx }, rx)
}

// ── Service ──────────────────────────────────────────────────────────────────

pub struct LivenessService {
    monitor: LivenessMonitor,
    activity_rx: mpsc::Receiver<()>,
    exit: ExitHandle,
    sink: Arc<dyn ErrorSink>,
}

impl LivenessService {
    pub fn new(
        monitor: LivenessMonitor,
        activity_rx: mpsc::Receiver<()>,
        exit: ExitHandle,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self { monitor, activity_rx, exit, sink }
    }

    async fn run_loop(mut self, shutdown: CancellationToken) -> Result<(), AppError> {
        info!("liveness monitor running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                signal = self.activity_rx.recv() => {
                    if signal.is_none() {
                        debug!("activity source closed, liveness monitor idle");
                        shutdown.cancelled().await;
                        break;
                    }
                    let now = self.monitor.now();
                    match self.monitor.sample(now) {
                        Verdict::Skipped => {}
                        Verdict::Alive => trace!("comet channel alive"),
                        Verdict::Dead { silent } => {
                            warn!(silent_ms = silent.as_millis() as u64, "comet loop has died: rebooting");
                            report_fault(self.sink.as_ref(), &ClientError::Liveness { silent_ms: silent.as_millis() as u64 });
                            self.exit.request(SessionExit::Reboot);
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl Component for LivenessService {
    fn id(&self) -> &str {
        "liveness"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(self.run_loop(shutdown))
    }
}

// ── Ticker ───────────────────────────────────────────────────────────────────

/// Periodic activity source for hosts without user input.
pub struct ActivityTicker {
    activity: ActivityHandle,
    every: Duration,
}

impl ActivityTicker {
    pub fn new(activity: ActivityHandle, every: Duration) -> Self {
        Self { activity, every }
    }
}

impl Component for ActivityTicker {
    fn id(&self) -> &str {
        "activity-ticker"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            let mut interval = tokio::time::interval(self.every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => self.activity.touch(),
                }
            }
            Ok(())
        })
    }
}
