//! Comet channel — the self-healing long-poll loop.
//!
//! ```text
//!            issue poll (reason)
//!   Idle-Retry ─────────────────▶ Waiting
//!       ▲                            │ completion (ok or error)
//!       │  pending push: ack, now    │
//!       └──── otherwise: timeout, ◀──┘
//!             after retry_delay
//! ```
//!
//! There is no terminal state: the loop runs until the session's shutdown
//! token is cancelled. Every re-issue yields to the scheduler first so the
//! loop never recurses or starves other tasks, even when the transport
//! completes synchronously.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::{AppError, ClientError};
use crate::hooks::ScriptRunner;
use crate::report::{ErrorSink, report_fault};
use crate::runtime::{Component, ComponentFuture};
use crate::transport::{Action, RequestType, Transport, WireRequest};

// ── Clock ────────────────────────────────────────────────────────────────────

/// Time source for response stamps and liveness samples.
///
/// Wall time, so a suspended host wakes up already looking silent.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

fn epoch_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

// ── CometState ───────────────────────────────────────────────────────────────

/// Session-wide push channel state.
///
/// Written by the comet loop and by pushed scripts, read by the liveness
/// monitor; atomics keep it single-writer-safe without a lock.
#[derive(Debug)]
pub struct CometState {
    clock: Arc<dyn Clock>,
    /// Milliseconds since the Unix epoch of the last acknowledged push.
    last_response_ms: AtomicU64,
    pending: AtomicBool,
}

impl CometState {
    /// System clock; `last_response` starts at the current instant.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let start = epoch_ms(clock.now());
        Self {
            clock,
            last_response_ms: AtomicU64::new(start),
            pending: AtomicBool::new(false),
        }
    }

    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    /// Record that the server pushed something that still needs an `ack`.
    /// Boolean: several pushes before the next completion collapse into one.
    pub fn mark_pending(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Clear the pending flag, returning whether it was set.
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    /// Never moves `last_response` backwards.
    pub fn touch(&self, at: SystemTime) {
        self.last_response_ms.fetch_max(epoch_ms(at), Ordering::SeqCst);
    }

    pub fn touch_now(&self) {
        self.touch(self.now());
    }

    pub fn last_response(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_response_ms.load(Ordering::SeqCst))
    }
}

impl Default for CometState {
    fn default() -> Self {
        Self::new()
    }
}

// ── CometReason ──────────────────────────────────────────────────────────────

/// Why a poll is being (re)issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CometReason {
    /// First poll of a fresh viewport.
    Boot,
    /// First poll after re-attaching to an existing viewport.
    Refresh,
    /// The previous poll delivered a push.
    Ack,
    /// The previous poll expired without a push.
    Timeout,
}

impl From<CometReason> for Action {
    fn from(reason: CometReason) -> Self {
        match reason {
            CometReason::Boot => Action::Boot,
            CometReason::Refresh => Action::Refresh,
            CometReason::Ack => Action::Ack,
            CometReason::Timeout => Action::Timeout,
        }
    }
}

// ── CometChannel ─────────────────────────────────────────────────────────────

pub struct CometChannel {
    transport: Arc<dyn Transport>,
    state: Arc<CometState>,
    runner: Arc<dyn ScriptRunner>,
    sink: Arc<dyn ErrorSink>,
    retry_delay: Duration,
    initial: CometReason,
}

impl CometChannel {
    pub fn new(
        transport: Arc<dyn Transport>,
        state: Arc<CometState>,
        runner: Arc<dyn ScriptRunner>,
        sink: Arc<dyn ErrorSink>,
        retry_delay: Duration,
        initial: CometReason,
    ) -> Self {
        Self { transport, state, runner, sink, retry_delay, initial }
    }

    async fn run_loop(self, shutdown: CancellationToken) -> Result<(), AppError> {
        info!(reason = ?self.initial, "comet channel starting");
        let mut reason = self.initial;

        loop {
            // Unwind before the next iteration.
            tokio::task::yield_now().await;

            let request = WireRequest::comet(reason.into());
            debug!(reason = ?reason, "comet poll issued");

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = self.transport.send(request) => outcome,
            };

            match outcome {
                Ok(body) => {
                    if let Err(e) = self.runner.run(&body, &self.state) {
                        report_fault(self.sink.as_ref(), &ClientError::Script(e.to_string()));
                    }
                }
                // Silent to the user; the loop heals through the timeout path.
                Err(source) => {
                    report_fault(self.sink.as_ref(), &ClientError::Transport { channel: RequestType::Comet, source });
                }
            }

            reason = if self.state.take_pending() {
                self.state.touch_now();
                trace!("push acknowledged");
                CometReason::Ack
            } else {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
                CometReason::Timeout
            };
        }

        info!("comet channel stopped");
        Ok(())
    }
}

impl Component for CometChannel {
    fn id(&self) -> &str {
        "comet"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(self.run_loop(shutdown))
    }
}
