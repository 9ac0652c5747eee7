//! Application-wide error types.
//!
//! [`AppError`] covers process-level failures (config, logger, runtime).
//! [`ClientError`] is the client-side fault taxonomy that flows through the
//! request queue, the comet loop and the error sink.

use thiserror::Error;

use crate::transport::{RequestType, TransportError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("session error: {0}")]
    Session(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Faults observed by the client runtime.
///
/// Only [`ClientError::Liveness`] and [`ClientError::Configuration`] are
/// fatal for a session; everything else is absorbed by the next natural
/// iteration of the queue or the comet loop.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// A request failed at the network or protocol level.
    #[error("{channel} transport failure: {source}")]
    Transport {
        channel: RequestType,
        #[source]
        source: TransportError,
    },

    /// Server-pushed script or a local callback raised an error.
    #[error("client script failure: {0}")]
    Script(String),

    /// The comet channel stopped answering; the session must reboot.
    #[error("comet channel silent for {silent_ms}ms")]
    Liveness { silent_ms: u64 },

    /// The environment cannot host a session (e.g. no session cookie).
    #[error("configuration failure: {0}")]
    Configuration(String),

    /// The session runtime has shut down and accepts no more work.
    #[error("session is not running")]
    Closed,
}
