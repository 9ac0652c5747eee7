//! Transport seam — the only place the client touches the network.
//!
//! The queue, the comet loop and the error sink all talk to the server
//! through [`Transport::send`]. A response body is the script the server
//! wants executed client-side; see [`crate::hooks::ScriptRunner`].

pub mod http;
pub mod wire;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub use http::HttpTransport;
pub use wire::{Action, Endpoint, Payload, RequestType, WireRequest};

/// Body of a successful response: script content pushed by the server.
pub type ScriptBody = String;

/// A boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ScriptBody, TransportError>> + Send + 'a>>;

/// Issue one request and resolve once it has completed or failed.
///
/// Implementations must not retry: a failure is reported once and the
/// caller decides what happens next.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: WireRequest) -> TransportFuture<'_>;
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("http request failed: {0}")]
    Request(String),

    #[error("server returned status {status}")]
    Status { status: u16, body: String },

    #[error("transport closed before completion")]
    Closed,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Request(e.to_string())
    }
}
