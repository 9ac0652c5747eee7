//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::comet::{Clock, CometState};
use crate::error::ClientError;
use crate::hooks::{CookieCheck, ScriptError, ScriptRunner, UiHooks};
use crate::report::ErrorSink;
use crate::transport::{ScriptBody, Transport, TransportError, TransportFuture, WireRequest};

/// Records requests and answers from a script of canned responses
/// (empty body once the script runs out).
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<(Instant, WireRequest)>>,
    responses: Mutex<VecDeque<Result<ScriptBody, TransportError>>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency: Some(latency), ..Self::default() }
    }

    pub fn push_response(&self, response: Result<ScriptBody, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn sent(&self) -> Vec<WireRequest> {
        self.sent.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn sent_at(&self) -> Vec<(Instant, WireRequest)> {
        self.sent.lock().unwrap().clone()
    }

    /// Yield until at least `n` requests were sent. Does not advance time.
    pub async fn wait_for_sent(&self, n: usize) -> Vec<WireRequest> {
        for _ in 0..10_000 {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {n} requests, saw {}", self.sent().len());
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: WireRequest) -> TransportFuture<'_> {
        self.sent.lock().unwrap().push((Instant::now(), request));
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()));
        let latency = self.latency;
        Box::pin(async move {
            if let Some(d) = latency {
                tokio::time::sleep(d).await;
            }
            response
        })
    }
}

/// Holds every request open until the test completes it by index.
#[derive(Default)]
pub struct GatedTransport {
    sent: Mutex<Vec<WireRequest>>,
    gates: Mutex<Vec<Option<oneshot::Sender<Result<ScriptBody, TransportError>>>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<WireRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn complete(&self, index: usize, response: Result<ScriptBody, TransportError>) {
        let gate = self.gates.lock().unwrap()[index].take().expect("request already completed");
        gate.send(response).expect("request future dropped");
    }

    pub async fn wait_for_sent(&self, n: usize) -> Vec<WireRequest> {
        for _ in 0..10_000 {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {n} requests, saw {}", self.sent().len());
    }

    /// Yield a while and assert no further request went out.
    pub async fn assert_quiet(&self, expected: usize) {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(self.sent().len(), expected);
    }
}

impl Transport for GatedTransport {
    fn send(&self, request: WireRequest) -> TransportFuture<'_> {
        let (tx, rx) = oneshot::channel();
        self.sent.lock().unwrap().push(request);
        self.gates.lock().unwrap().push(Some(tx));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Box::pin(async move {
            let result = rx.await.unwrap_or(Err(TransportError::Closed));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub reports: Mutex<Vec<ClientError>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<ClientError> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, failure: &ClientError) -> bool {
        self.reports.lock().unwrap().push(failure.clone());
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Busy(bool),
    Notice(String),
}

#[derive(Default)]
pub struct RecordingUi {
    pub events: Mutex<Vec<UiEvent>>,
}

impl RecordingUi {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl UiHooks for RecordingUi {
    fn set_busy(&self, busy: bool) {
        self.events.lock().unwrap().push(UiEvent::Busy(busy));
    }

    fn notify(&self, message: &str) {
        self.events.lock().unwrap().push(UiEvent::Notice(message.to_string()));
    }
}

/// `"push"` marks a pending push, `"throw"` fails, anything else is a no-op.
pub struct KeywordRunner;

impl ScriptRunner for KeywordRunner {
    fn run(&self, script: &str, comet: &CometState) -> Result<(), ScriptError> {
        match script {
            "push" => {
                comet.mark_pending();
                Ok(())
            }
            "throw" => Err(ScriptError("thrown by pushed script".into())),
            _ => Ok(()),
        }
    }
}

pub struct FixedCookie(pub bool);

impl CookieCheck for FixedCookie {
    fn has_session_cookie(&self) -> bool {
        self.0
    }
}

fn test_epoch() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

/// Wall clock that follows tokio time, so paused tests can advance it.
#[derive(Debug)]
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> SystemTime {
        test_epoch() + self.origin.elapsed()
    }
}

/// Wall clock moved only by [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Mutex::new(test_epoch()) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}
