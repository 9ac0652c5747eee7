//! Request queue — strictly ordered, single-flight outbound calls.
//!
//! [`QueueHandle`] is the cloneable front end; [`QueueService`] is the
//! single owner of the queue and runs as a session component. Requests run
//! in enqueue order, one at a time. The head stays in the queue while it is
//! in flight and is removed only when the transport reports completion,
//! successful or not. Nothing is retried: a failed request is surfaced once
//! and the queue moves on.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::comet::CometState;
use crate::error::{AppError, ClientError};
use crate::hooks::{ScriptRunner, UiHooks};
use crate::report::{ErrorSink, report_fault};
use crate::runtime::{Component, ComponentFuture};
use crate::transport::{RequestType, ScriptBody, Transport, TransportError, WireRequest};

pub const FAILURE_NOTICE: &str = "Something went wrong talking to the server. Details were logged.";
pub const SCRIPT_FAILURE_NOTICE: &str = "Client side error. Details were logged.";

/// Runs with the response body once a request succeeded.
pub type SuccessCallback = Box<dyn FnOnce(&str) + Send + 'static>;

/// A unit of work owned by the queue until it completes.
pub struct QueuedRequest {
    request: WireRequest,
    on_success: Option<SuccessCallback>,
    done: Option<oneshot::Sender<Result<(), ClientError>>>,
}

/// Resolves after the request left the queue.
pub struct Completion {
    rx: oneshot::Receiver<Result<(), ClientError>>,
}

impl Completion {
    pub async fn wait(self) -> Result<(), ClientError> {
        self.rx.await.unwrap_or(Err(ClientError::Closed))
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<QueuedRequest>,
}

impl QueueHandle {
    /// Append `request` to the tail. Never blocks; if the queue was idle
    /// the request starts right away.
    pub fn enqueue(
        &self,
        request: WireRequest,
        on_success: Option<SuccessCallback>,
    ) -> Result<Completion, ClientError> {
        let (done_tx, done_rx) = oneshot::channel();
        let entry = QueuedRequest { request, on_success, done: Some(done_tx) };
        self.tx.send(entry).map_err(|_| ClientError::Closed)?;
        Ok(Completion { rx: done_rx })
    }
}

/// Create a connected handle/service pair.
pub fn channel(
    transport: Arc<dyn Transport>,
    hooks: QueueHooks,
    busy_delay: Duration,
) -> (QueueHandle, QueueService) {
    let (tx, rx) = mpsc::unbounded_channel();
    let service = QueueService { rx, transport, hooks, busy_delay };
    (QueueHandle { tx }, service)
}

/// Collaborators the queue reports through.
pub struct QueueHooks {
    pub runner: Arc<dyn ScriptRunner>,
    pub ui: Arc<dyn UiHooks>,
    pub sink: Arc<dyn ErrorSink>,
    pub comet: Arc<CometState>,
}

// ── Busy indicator ───────────────────────────────────────────────────────────

/// Once armed the indicator stays armed (or shown) until the queue drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Busy {
    Idle,
    Armed(Instant),
    Shown,
}

// ── Service ──────────────────────────────────────────────────────────────────

pub struct QueueService {
    rx: mpsc::UnboundedReceiver<QueuedRequest>,
    transport: Arc<dyn Transport>,
    hooks: QueueHooks,
    busy_delay: Duration,
}

type InFlight = JoinHandle<Result<ScriptBody, TransportError>>;

impl QueueService {
    async fn run_loop(mut self, shutdown: CancellationToken) -> Result<(), AppError> {
        let mut queue: VecDeque<QueuedRequest> = VecDeque::new();
        let mut in_flight: Option<InFlight> = None;
        let mut busy = Busy::Idle;

        info!("request queue running");

        loop {
            let busy_deadline = match busy {
                Busy::Armed(at) => Some(at),
                _ => None,
            };

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(dropped = queue.len(), "request queue shutting down");
                    break;
                }

                // ── Head completed ───────────────────────────────────────
                joined = async {
                    match in_flight.as_mut() {
                        Some(handle) => handle.await,
                        None => std::future::pending().await,
                    }
                } => {
                    in_flight = None;
                    let outcome = joined.unwrap_or_else(|e| {
                        Err(TransportError::Request(format!("transport task failed: {e}")))
                    });
                    self.on_request_complete(&mut queue, outcome);

                    match queue.front() {
                        Some(head) => {
                            in_flight = Some(self.execute(head));
                            busy = arm(busy, self.busy_delay);
                        }
                        None => {
                            if busy == Busy::Shown {
                                self.hooks.ui.set_busy(false);
                            }
                            busy = Busy::Idle;
                        }
                    }
                }

                // ── New request ──────────────────────────────────────────
                entry = self.rx.recv() => {
                    let Some(entry) = entry else {
                        info!("all queue handles dropped, request queue exiting");
                        break;
                    };
                    debug!(action = %entry.request.action, depth = queue.len() + 1, "request enqueued");
                    queue.push_back(entry);
                    if queue.len() == 1 {
                        in_flight = queue.front().map(|head| self.execute(head));
                        busy = arm(busy, self.busy_delay);
                    }
                }

                // ── Busy indicator ───────────────────────────────────────
                _ = async {
                    match busy_deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    busy = Busy::Shown;
                    self.hooks.ui.set_busy(true);
                }
            }
        }

        if let Some(handle) = in_flight {
            handle.abort();
        }
        Ok(())
    }

    /// Start the transport call for `head` in its own task.
    fn execute(&self, head: &QueuedRequest) -> InFlight {
        let transport = Arc::clone(&self.transport);
        let request = head.request.clone();
        debug!(action = %request.action, "executing queue head");
        tokio::spawn(async move { transport.send(request).await })
    }

    /// Remove the head and settle it.
    fn on_request_complete(
        &self,
        queue: &mut VecDeque<QueuedRequest>,
        outcome: Result<ScriptBody, TransportError>,
    ) {
        let Some(mut entry) = queue.pop_front() else {
            warn!("completion with empty queue");
            return;
        };

        let result = match outcome {
            Ok(body) => match self.hooks.runner.run(&body, &self.hooks.comet) {
                Ok(()) => {
                    if let Some(callback) = entry.on_success.take() {
                        callback(&body);
                    }
                    Ok(())
                }
                Err(e) => {
                    let failure = ClientError::Script(e.to_string());
                    self.hooks.ui.notify(SCRIPT_FAILURE_NOTICE);
                    report_fault(self.hooks.sink.as_ref(), &failure);
                    Err(failure)
                }
            },
            Err(source) => {
                let failure = ClientError::Transport { channel: RequestType::Ajax, source };
                self.hooks.ui.notify(FAILURE_NOTICE);
                report_fault(self.hooks.sink.as_ref(), &failure);
                Err(failure)
            }
        };

        if let Some(done) = entry.done.take() {
            let _ = done.send(result);
        }
    }
}

fn arm(busy: Busy, delay: Duration) -> Busy {
    match busy {
        Busy::Idle => Busy::Armed(Instant::now() + delay),
        other => other,
    }
}

impl Component for QueueService {
    fn id(&self) -> &str {
        "queue"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(self.run_loop(shutdown))
    }
}
