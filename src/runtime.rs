//! Component runtime — shared scaffolding for the session's long-lived tasks.
//!
//! # Component model
//!
//! A [`Component`] is an independently-runnable unit of a session: the
//! request queue, the comet loop, the liveness monitor. The session builds
//! each component with its shared state already captured, then hands them
//! to [`spawn_components`].
//!
//! Any component error cancels the shared [`CancellationToken`] so its
//! siblings stop too; a session is only ever torn down as a whole.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

// ── Component ─────────────────────────────────────────────────────────────────

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit owned by a session.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its run-loop. The loop must exit
    /// once `shutdown` is cancelled.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

// ── ComponentsHandle ──────────────────────────────────────────────────────────

/// Handle to a running component set, resolved once every component exited.
pub struct ComponentsHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl ComponentsHandle {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Session(format!("component set panicked: {e}"))),
        }
    }
}

// ── spawn_components ──────────────────────────────────────────────────────────

/// Spawn each [`Component`] as its own Tokio task.
///
/// If any component returns `Err` or panics, `shutdown` is cancelled and
/// the first error is returned from [`ComponentsHandle::join`] once the
/// rest have drained.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> ComponentsHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            debug!(component = %id, "spawning component");
            set.spawn(component.run(shutdown.clone()));
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| AppError::Session(format!("component panicked: {e}")));
                }
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    ComponentsHandle { inner: handle }
}
