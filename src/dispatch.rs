//! Event dispatcher — turns UI events into queued requests.
//!
//! Every dispatch is guarded by a caller-supplied precondition; when it
//! returns `false` nothing is queued, which lets the UI validate locally
//! before paying for a round trip.

use std::fmt::Display;

use tracing::{debug, trace};

use crate::error::ClientError;
use crate::hooks::ScriptError;
use crate::queue::{Completion, QueueHandle, SuccessCallback};
use crate::session::{ExitHandle, SessionExit};
use crate::transport::{Action, Payload, WireRequest};

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A specific widget on the server.
    Widget(String),
    /// The viewport (session) itself.
    Viewport,
}

#[derive(Clone)]
pub struct EventDispatcher {
    queue: QueueHandle,
    exit: ExitHandle,
}

impl EventDispatcher {
    pub fn new(queue: QueueHandle, exit: ExitHandle) -> Self {
        Self { queue, exit }
    }

    /// Queue an event for `target` if `before()` allows it.
    ///
    /// `after` is evaluated right away, once `before` passed; the callback it
    /// returns runs with the response body after the request succeeded.
    /// Returns `Ok(None)` when the precondition vetoed the event.
    pub fn dispatch<B, A>(
        &self,
        target: Target,
        callback_id: &str,
        before: B,
        payload: Payload,
        after: A,
    ) -> Result<Option<Completion>, ClientError>
    where
        B: FnOnce() -> bool,
        A: FnOnce() -> Option<SuccessCallback>,
    {
        if !before() {
            trace!(callback_id, "precondition vetoed event");
            return Ok(None);
        }

        let request = match target {
            Target::Widget(widget_id) => WireRequest::ajax(Action::WidgetEvent).widget(widget_id),
            Target::Viewport => WireRequest::ajax(Action::ViewportEvent),
        }
        .callback(callback_id)
        .payload(payload);

        debug!(action = %request.action, callback_id, "dispatching event");
        self.queue.enqueue(request, after()).map(Some)
    }

    pub fn widget_event<B, A>(
        &self,
        widget_id: &str,
        callback_id: &str,
        before: B,
        payload: Payload,
        after: A,
    ) -> Result<Option<Completion>, ClientError>
    where
        B: FnOnce() -> bool,
        A: FnOnce() -> Option<SuccessCallback>,
    {
        self.dispatch(Target::Widget(widget_id.to_string()), callback_id, before, payload, after)
    }

    pub fn viewport_event<B, A>(
        &self,
        callback_id: &str,
        before: B,
        payload: Payload,
        after: A,
    ) -> Result<Option<Completion>, ClientError>
    where
        B: FnOnce() -> bool,
        A: FnOnce() -> Option<SuccessCallback>,
    {
        self.dispatch(Target::Viewport, callback_id, before, payload, after)
    }

    /// Report the value of a server-requested computation.
    pub fn return_value(&self, code_id: &str, value: &str) -> Result<Completion, ClientError> {
        let request = WireRequest::ajax(Action::JsAck)
            .code(code_id)
            .payload(Payload::new().with("return-value", value));
        self.queue.enqueue(request, None)
    }

    /// Report that a server-requested computation failed.
    pub fn return_fail(&self, code_id: &str, error: &dyn Display) -> Result<Completion, ClientError> {
        let request = WireRequest::ajax(Action::JsFail)
            .code(code_id)
            .payload(Payload::new().with("exception-str", error.to_string()));
        self.queue.enqueue(request, None)
    }

    /// Run a computation the server asked for.
    ///
    /// Synchronous code reports its value (or failure) back. Asynchronous
    /// code reports on its own and only failures are sent from here.
    pub fn run<F>(&self, code_id: &str, is_async: bool, f: F) -> Result<Option<Completion>, ClientError>
    where
        F: FnOnce() -> Result<String, ScriptError>,
    {
        match f() {
            Ok(_) if is_async => Ok(None),
            Ok(value) => self.return_value(code_id, &value).map(Some),
            Err(e) => self.return_fail(code_id, &e).map(Some),
        }
    }

    /// Ask the server to drop the session, then reboot once it confirmed.
    pub fn terminate_session(&self) -> Result<Completion, ClientError> {
        let exit = self.exit.clone();
        self.queue.enqueue(
            WireRequest::ajax(Action::TerminateSession),
            Some(Box::new(move |_: &str| exit.request(SessionExit::Reboot))),
        )
    }
}
