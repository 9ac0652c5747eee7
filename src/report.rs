//! Global error sink.
//!
//! Every absorbed fault ends up here. [`ServerErrorSink`] logs it and
//! forwards a best-effort `do=error` diagnostic to the server. If that
//! diagnostic itself fails it is dropped: reporting never produces further
//! reports. Call sites go through [`report_fault`], which logs locally
//! whenever the sink leaves the fault unhandled.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::ClientError;
use crate::transport::{Action, Payload, Transport, WireRequest};

/// Receives faults the runtime absorbed.
///
/// Returns `true` when the fault is fully handled. `false` means the caller
/// should still run its own default fault handling.
pub trait ErrorSink: Send + Sync {
    fn report(&self, failure: &ClientError) -> bool;
}

pub struct ServerErrorSink {
    transport: Arc<dyn Transport>,
}

impl ServerErrorSink {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

/// Hand `failure` to `sink`; when it is not fully handled, log it here.
/// Returns whether the local fallback ran.
pub fn report_fault(sink: &dyn ErrorSink, failure: &ClientError) -> bool {
    if sink.report(failure) {
        return false;
    }
    error!(error = %failure, kind = kind(failure), "client fault");
    true
}

impl ErrorSink for ServerErrorSink {
    fn report(&self, failure: &ClientError) -> bool {
        // Configuration faults stay local: nothing may be sent without a
        // session.
        if matches!(failure, ClientError::Configuration(_)) {
            return false;
        }

        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime available, diagnostic not forwarded");
            return false;
        };

        debug!(kind = kind(failure), "forwarding fault to server");
        let request = WireRequest::ajax(Action::Error).payload(
            Payload::new()
                .with("kind", kind(failure))
                .with("message", failure.to_string()),
        );
        let transport = Arc::clone(&self.transport);
        rt.spawn(async move {
            if let Err(e) = transport.send(request).await {
                debug!(error = %e, "diagnostic report dropped");
            }
        });

        false
    }
}

fn kind(failure: &ClientError) -> &'static str {
    match failure {
        ClientError::Transport { .. } => "transport",
        ClientError::Script(_) => "script",
        ClientError::Liveness { .. } => "liveness",
        ClientError::Configuration(_) => "configuration",
        ClientError::Closed => "closed",
    }
}
