//! Host collaborators: the parts of the environment the runtime drives
//! but does not own: script execution, UI feedback and the cookie check.
//!
//! Each is a trait so an embedding (browser bridge, headless test harness,
//! console client) can supply its own. The defaults here log through
//! `tracing`.

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::comet::CometState;

/// Assignment the server emits in a comet response when it has pushed
/// something and expects an `ack`.
pub const PUSH_MARKER: &str = "_sw_comet_response = true";

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ScriptError(pub String);

/// Executes server-pushed script content.
///
/// A comet response signals a pending push by calling
/// [`CometState::mark_pending`] while it runs.
pub trait ScriptRunner: Send + Sync {
    fn run(&self, script: &str, comet: &CometState) -> Result<(), ScriptError>;
}

/// Cosmetic UI feedback.
pub trait UiHooks: Send + Sync {
    /// Show or hide the busy indicator.
    fn set_busy(&self, busy: bool);

    /// One-shot user-visible notification.
    fn notify(&self, message: &str);
}

/// Whether the environment carries a session cookie.
pub trait CookieCheck: Send + Sync {
    fn has_session_cookie(&self) -> bool;
}

// ── Defaults ─────────────────────────────────────────────────────────────────

/// Recognises the push marker and logs everything else.
///
/// Headless clients have nothing to render, so the rest of the script is
/// only surfaced at `trace`.
#[derive(Debug, Default, Clone)]
pub struct MarkerScriptRunner;

impl ScriptRunner for MarkerScriptRunner {
    fn run(&self, script: &str, comet: &CometState) -> Result<(), ScriptError> {
        if script.contains(PUSH_MARKER) {
            debug!("push marker found in response");
            comet.mark_pending();
        }
        trace!(script = %script, "script received");
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LogUi;

impl UiHooks for LogUi {
    fn set_busy(&self, busy: bool) {
        debug!(busy, "busy indicator");
    }

    fn notify(&self, message: &str) {
        warn!("{message}");
    }
}

/// Cookie presence decided up front, from configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredCookie(pub Option<String>);

impl CookieCheck for ConfiguredCookie {
    fn has_session_cookie(&self) -> bool {
        let present = self.0.as_deref().is_some_and(|c| !c.trim().is_empty());
        if !present {
            info!("no session cookie configured");
        }
        present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_sets_pending() {
        let state = CometState::new();
        MarkerScriptRunner
            .run("doStuff();\n_sw_comet_response = true;", &state)
            .unwrap();
        assert!(state.is_pending());
    }

    #[test]
    fn plain_script_leaves_flag_alone() {
        let state = CometState::new();
        MarkerScriptRunner.run("console.log('hi');", &state).unwrap();
        assert!(!state.is_pending());
    }

    #[test]
    fn cookie_check() {
        assert!(ConfiguredCookie(Some("sid=abc".into())).has_session_cookie());
        assert!(!ConfiguredCookie(Some("  ".into())).has_session_cookie());
        assert!(!ConfiguredCookie(None).has_session_cookie());
    }
}
