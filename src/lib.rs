//! Client runtime for server-driven web UIs.
//!
//! UI events become requests on a strictly ordered, single-flight
//! [`queue`]. Independently, a [`comet`] long-poll loop keeps a push channel
//! open and a [`liveness`] monitor reboots the [`session`] when that channel
//! dies. Rendering and server-side logic live elsewhere; the runtime talks
//! to them through [`transport::Transport`] and the traits in [`hooks`].

pub mod comet;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod liveness;
pub mod logger;
pub mod queue;
pub mod report;
pub mod runtime;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
