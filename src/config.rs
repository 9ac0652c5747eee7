//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `SW_PAGE_URL`, `SW_LOG_LEVEL` and `SW_SESSION_COOKIE`
//! env overrides. All timings are milliseconds in the TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;
use crate::logger::parse_level;
use crate::transport::http::DEFAULT_POST_THRESHOLD;

/// Where the client talks to and as which viewport.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// URL of the page hosting the UI; requests go to its directory.
    pub page_url: String,
    /// Re-attach to an existing viewport instead of booting a new one.
    pub viewport_id: Option<String>,
    /// Host prefix such as `c7.`, for servers that spread clients over
    /// subdomains.
    pub dynamic_subdomain: Option<String>,
    /// Sent verbatim as the `Cookie` header.
    pub session_cookie: Option<String>,
    /// Upper bound for the best-effort unload call.
    pub unload_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Outstanding time before the busy indicator shows.
    pub busy_indicator_delay: Duration,
    /// URL + payload length above which requests switch to POST.
    pub post_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct CometConfig {
    /// How long the server holds a poll open.
    pub timeout: Duration,
    /// Pause before re-polling after an expired poll.
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Minimum spacing between liveness samples.
    pub poll_interval: Duration,
    /// Grace period after the comet timeout before the channel counts as dead.
    pub response_window: Duration,
    /// Synthetic activity period; `None` leaves sampling to user input only.
    pub activity_tick: Option<Duration>,
}

/// Fully-resolved client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Optional log file (already expanded, no `~`).
    pub log_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub comet: CometConfig,
    pub liveness: LivenessConfig,
}

impl Config {
    /// Per-request HTTP timeout: a poll must be allowed to outlast the
    /// server's hold time.
    pub fn request_timeout(&self) -> Duration {
        self.comet.timeout + self.liveness.response_window
    }
}

/// Values that take precedence over the TOML file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub page_url: Option<String>,
    pub log_level: Option<String>,
    pub session_cookie: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            page_url: env::var("SW_PAGE_URL").ok(),
            log_level: env::var("SW_LOG_LEVEL").ok(),
            session_cookie: env::var("SW_SESSION_COOKIE").ok(),
        }
    }
}

/// Raw TOML shape, before defaults and overrides.
#[derive(Deserialize)]
struct RawConfig {
    client: RawClient,
    server: RawServer,
    #[serde(default)]
    queue: RawQueue,
    #[serde(default)]
    comet: RawComet,
    #[serde(default)]
    liveness: RawLiveness,
}

#[derive(Deserialize)]
struct RawClient {
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Deserialize)]
struct RawServer {
    page_url: String,
    #[serde(default)]
    viewport_id: Option<String>,
    #[serde(default)]
    dynamic_subdomain: Option<String>,
    #[serde(default)]
    session_cookie: Option<String>,
    #[serde(default = "default_unload_timeout_ms")]
    unload_timeout_ms: u64,
}

#[derive(Deserialize)]
struct RawQueue {
    #[serde(default = "default_busy_indicator_delay_ms")]
    busy_indicator_delay_ms: u64,
    #[serde(default = "default_post_threshold")]
    post_threshold: usize,
}

impl Default for RawQueue {
    fn default() -> Self {
        Self {
            busy_indicator_delay_ms: default_busy_indicator_delay_ms(),
            post_threshold: default_post_threshold(),
        }
    }
}

#[derive(Deserialize)]
struct RawComet {
    #[serde(default = "default_comet_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,
}

impl Default for RawComet {
    fn default() -> Self {
        Self { timeout_ms: default_comet_timeout_ms(), retry_delay_ms: default_retry_delay_ms() }
    }
}

#[derive(Deserialize)]
struct RawLiveness {
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_response_window_ms")]
    response_window_ms: u64,
    /// `0` disables the synthetic ticker.
    #[serde(default)]
    activity_tick_ms: u64,
}

impl Default for RawLiveness {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            response_window_ms: default_response_window_ms(),
            activity_tick_ms: 0,
        }
    }
}

fn default_unload_timeout_ms() -> u64 { 2000 }
fn default_busy_indicator_delay_ms() -> u64 { 500 }
fn default_post_threshold() -> usize { DEFAULT_POST_THRESHOLD }
fn default_comet_timeout_ms() -> u64 { 30_000 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_poll_interval_ms() -> u64 { 5000 }
fn default_response_window_ms() -> u64 { 5000 }

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    load_from(Path::new("config/default.toml"), &Overrides::from_env())
}

/// Load from an explicit path with the given overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if parsed.liveness.poll_interval_ms == 0 {
        return Err(AppError::Config("liveness.poll_interval_ms must be positive".into()));
    }

    let s = parsed.server;
    let page_url = overrides.page_url.clone().unwrap_or(s.page_url);
    if page_url.trim().is_empty() {
        return Err(AppError::Config("server.page_url must not be empty".into()));
    }

    let ms = Duration::from_millis;

    let log_level = overrides.log_level.clone().unwrap_or(parsed.client.log_level);
    parse_level(&log_level).map_err(|e| AppError::Config(format!("client.log_level: {e}")))?;

    Ok(Config {
        log_level,
        log_file: parsed.client.log_file.as_deref().map(expand_home),
        server: ServerConfig {
            page_url,
            viewport_id: s.viewport_id.filter(|id| !id.is_empty()),
            dynamic_subdomain: s.dynamic_subdomain.filter(|d| !d.trim_end_matches('.').is_empty()),
            session_cookie: overrides.session_cookie.clone().or(s.session_cookie),
            unload_timeout: ms(s.unload_timeout_ms),
        },
        queue: QueueConfig {
            busy_indicator_delay: ms(parsed.queue.busy_indicator_delay_ms),
            post_threshold: parsed.queue.post_threshold,
        },
        comet: CometConfig {
            timeout: ms(parsed.comet.timeout_ms),
            retry_delay: ms(parsed.comet.retry_delay_ms),
        },
        liveness: LivenessConfig {
            poll_interval: ms(parsed.liveness.poll_interval_ms),
            response_window: ms(parsed.liveness.response_window_ms),
            activity_tick: (parsed.liveness.activity_tick_ms > 0)
                .then(|| ms(parsed.liveness.activity_tick_ms)),
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Defaults with a local page URL and a session cookie present.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            log_level: "info".into(),
            log_file: None,
            server: ServerConfig {
                page_url: "http://localhost:0/app/index".into(),
                viewport_id: None,
                dynamic_subdomain: None,
                session_cookie: Some("sid=test".into()),
                unload_timeout: Duration::from_millis(200),
            },
            queue: QueueConfig {
                busy_indicator_delay: Duration::from_millis(500),
                post_threshold: DEFAULT_POST_THRESHOLD,
            },
            comet: CometConfig {
                timeout: Duration::from_secs(30),
                retry_delay: Duration::from_millis(1000),
            },
            liveness: LivenessConfig {
                poll_interval: Duration::from_secs(5),
                response_window: Duration::from_secs(5),
                activity_tick: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[client]
log_level = "info"

[server]
page_url = "http://localhost:8080/app/"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.server.page_url, "http://localhost:8080/app/");
        assert_eq!(cfg.queue.busy_indicator_delay, Duration::from_millis(500));
        assert_eq!(cfg.queue.post_threshold, 1950);
        assert_eq!(cfg.comet.retry_delay, Duration::from_millis(1000));
        assert_eq!(cfg.liveness.poll_interval, Duration::from_millis(5000));
        assert_eq!(cfg.liveness.response_window, Duration::from_millis(5000));
        assert!(cfg.liveness.activity_tick.is_none());
        assert!(cfg.server.session_cookie.is_none());
    }

    #[test]
    fn timings_are_configurable() {
        let f = write_toml(&format!(
            "{MINIMAL_TOML}\n[comet]\ntimeout_ms = 10000\nretry_delay_ms = 250\n\n[liveness]\nactivity_tick_ms = 1000\n"
        ));
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.comet.timeout, Duration::from_secs(10));
        assert_eq!(cfg.comet.retry_delay, Duration::from_millis(250));
        assert_eq!(cfg.liveness.activity_tick, Some(Duration::from_secs(1)));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn overrides_win() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            page_url: Some("https://example.org/ui/".into()),
            log_level: Some("debug".into()),
            session_cookie: Some("sid=1".into()),
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.server.page_url, "https://example.org/ui/");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.server.session_cookie.as_deref(), Some("sid=1"));
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let f = write_toml(&format!("{MINIMAL_TOML}\n[liveness]\npoll_interval_ms = 0\n"));
        let err = load_from(f.path(), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn dynamic_subdomain_is_optional() {
        let f = write_toml(MINIMAL_TOML);
        assert!(load_from(f.path(), &Overrides::default()).unwrap().server.dynamic_subdomain.is_none());

        let f = write_toml(&format!("{MINIMAL_TOML}dynamic_subdomain = \"c7.\"\n"));
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.server.dynamic_subdomain.as_deref(), Some("c7."));
    }

    #[test]
    fn unknown_log_level_rejected() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides { log_level: Some("chatty".into()), ..Overrides::default() };
        let err = load_from(f.path(), &overrides).unwrap_err();
        assert!(err.to_string().contains("client.log_level"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.sw-client/client.log");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with("client.log"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/var/log/sw.log"), PathBuf::from("/var/log/sw.log"));
    }
}
