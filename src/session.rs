//! Session lifecycle — boot, run, unload, reboot.
//!
//! A session wires one request queue, one comet channel and one liveness
//! monitor around a shared [`CometState`], all spawned as components under
//! a single cancellation token. It ends in one of two ways:
//!
//! - **Shutdown**: the host asked to stop.
//! - **Reboot**: the liveness monitor declared the channel dead, or the
//!   server terminated the session. The caller boots a fresh session; no
//!   in-flight state survives.
//!
//! Either way a best-effort `do=unload` goes out first so the server can
//! release the viewport. A rebooted session therefore never re-attaches to
//! the old viewport; [`Attach::plan`] hands it a fresh one.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::comet::{Clock, CometChannel, CometReason, CometState, SystemClock};
use crate::config::{Config, ServerConfig};
use crate::dispatch::EventDispatcher;
use crate::error::{AppError, ClientError};
use crate::hooks::{ConfiguredCookie, CookieCheck, LogUi, MarkerScriptRunner, ScriptRunner, UiHooks};
use crate::liveness::{self, ActivityHandle, ActivityTicker, LivenessMonitor, LivenessService};
use crate::queue::{self, QueueHooks};
use crate::report::{ErrorSink, ServerErrorSink, report_fault};
use crate::runtime::{Component, ComponentsHandle, spawn_components};
use crate::transport::{Action, Endpoint, Transport, TransportError, WireRequest};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Shutdown,
    Reboot,
}

/// Lets components end the session from the inside.
#[derive(Clone)]
pub struct ExitHandle {
    tx: mpsc::Sender<SessionExit>,
}

impl ExitHandle {
    /// First request wins; later ones are dropped.
    pub fn request(&self, exit: SessionExit) {
        if let Err(e) = self.tx.try_send(exit) {
            debug!(?exit, "session exit already requested: {e}");
        }
    }
}

pub fn exit_channel() -> (ExitHandle, mpsc::Receiver<SessionExit>) {
    let (tx, rx) = mpsc::channel(1);
    (ExitHandle { tx }, rx)
}

/// Which viewport a session attaches to, and how its first poll says so.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attach {
    pub viewport_id: String,
    pub reason: CometReason,
}

impl Attach {
    /// A configured viewport was created by the server's pre-boot page and
    /// is refreshed by the first session only. Reboots, and clients without
    /// one, boot a fresh viewport.
    pub fn plan(server: &ServerConfig, rebooting: bool) -> Self {
        match &server.viewport_id {
            Some(id) if !rebooting => Self { viewport_id: id.clone(), reason: CometReason::Refresh },
            _ => Self { viewport_id: Uuid::new_v4().to_string(), reason: CometReason::Boot },
        }
    }

    pub fn endpoint(&self, server: &ServerConfig) -> Result<Endpoint, TransportError> {
        let endpoint = Endpoint::new(&server.page_url, &self.viewport_id)?;
        match &server.dynamic_subdomain {
            Some(subdomain) => endpoint.with_dynamic_subdomain(subdomain),
            None => Ok(endpoint),
        }
    }
}

/// Host-side collaborators a session drives.
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn ScriptRunner>,
    pub ui: Arc<dyn UiHooks>,
    pub cookies: Arc<dyn CookieCheck>,
    pub sink: Arc<dyn ErrorSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Tracing-backed defaults; faults are forwarded to the server.
    pub fn defaults(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self {
            runner: Arc::new(MarkerScriptRunner),
            ui: Arc::new(LogUi),
            cookies: Arc::new(ConfiguredCookie(config.server.session_cookie.clone())),
            sink: Arc::new(ServerErrorSink::new(transport)),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Cloneable entry points for whoever produces UI events.
#[derive(Clone)]
pub struct SessionHandle {
    pub dispatcher: EventDispatcher,
    pub activity: ActivityHandle,
}

pub struct Session {
    handle: SessionHandle,
    transport: Arc<dyn Transport>,
    exit_rx: mpsc::Receiver<SessionExit>,
    shutdown: CancellationToken,
    components: ComponentsHandle,
    unload_timeout: std::time::Duration,
}

impl Session {
    /// Boot a session: check the cookie, then start queue, comet and
    /// liveness.
    ///
    /// Without a session cookie a configuration failure is reported once
    /// and nothing is sent.
    pub fn boot(
        config: &Config,
        transport: Arc<dyn Transport>,
        collaborators: Collaborators,
        reason: CometReason,
    ) -> Result<Self, ClientError> {
        if !collaborators.cookies.has_session_cookie() {
            let failure = ClientError::Configuration("session cookie missing; cookies disabled?".into());
            report_fault(collaborators.sink.as_ref(), &failure);
            return Err(failure);
        }

        let comet = Arc::new(CometState::with_clock(Arc::clone(&collaborators.clock)));
        let shutdown = CancellationToken::new();
        let (exit, exit_rx) = exit_channel();
        let (activity, activity_rx) = liveness::activity_channel();

        let (queue_handle, queue_service) = queue::channel(
            Arc::clone(&transport),
            QueueHooks {
                runner: Arc::clone(&collaborators.runner),
                ui: Arc::clone(&collaborators.ui),
                sink: Arc::clone(&collaborators.sink),
                comet: Arc::clone(&comet),
            },
            config.queue.busy_indicator_delay,
        );

        let channel = CometChannel::new(
            Arc::clone(&transport),
            Arc::clone(&comet),
            Arc::clone(&collaborators.runner),
            Arc::clone(&collaborators.sink),
            config.comet.retry_delay,
            reason,
        );

        let monitor = LivenessMonitor::new(
            Arc::clone(&comet),
            config.liveness.poll_interval,
            config.comet.timeout,
            config.liveness.response_window,
            comet.now(),
        );
        let liveness = LivenessService::new(monitor, activity_rx, exit.clone(), Arc::clone(&collaborators.sink));

        let mut components: Vec<Box<dyn Component>> =
            vec![Box::new(queue_service), Box::new(channel), Box::new(liveness)];
        if let Some(every) = config.liveness.activity_tick {
            components.push(Box::new(ActivityTicker::new(activity.clone(), every)));
        }

        info!(?reason, "session booting");
        let components = spawn_components(components, shutdown.clone());

        Ok(Self {
            handle: SessionHandle {
                dispatcher: EventDispatcher::new(queue_handle, exit),
                activity,
            },
            transport,
            exit_rx,
            shutdown,
            components,
            unload_timeout: config.server.unload_timeout,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run until `stop` is cancelled or a component requests an exit.
    pub async fn run(mut self, stop: CancellationToken) -> Result<SessionExit, AppError> {
        let exit = tokio::select! {
            _ = stop.cancelled() => SessionExit::Shutdown,
            requested = self.exit_rx.recv() => requested.unwrap_or(SessionExit::Shutdown),
            // A component failure already cancelled the set.
            _ = self.shutdown.cancelled() => SessionExit::Shutdown,
        };
        info!(?exit, "session ending");

        self.unload().await;
        self.shutdown.cancel();
        self.components.join().await?;
        Ok(exit)
    }

    /// Best-effort: the server may already be gone.
    async fn unload(&self) {
        let request = WireRequest::ajax(Action::Unload);
        match tokio::time::timeout(self.unload_timeout, self.transport.send(request)).await {
            Ok(Ok(_)) => debug!("unload acknowledged"),
            Ok(Err(e)) => warn!(error = %e, "unload failed"),
            Err(_) => warn!("unload timed out"),
        }
    }
}
