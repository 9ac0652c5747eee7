//! Tracing setup for the client.
//!
//! The configured level applies to this crate; HTTP client internals are
//! capped at `warn` so a `debug` session log shows polls and queue activity
//! rather than connection-pool chatter. Output goes to stderr, or to
//! `log_file` without ANSI colours, so the console prompt on stdout stays
//! readable.

use std::fs::OpenOptions;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::Config;
use crate::error::AppError;

/// Crates whose output is capped regardless of the configured level.
const QUIET_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

/// Install the global subscriber from `config`.
///
/// With `prefer_level` the configured level wins and `RUST_LOG` is only
/// consulted when that level is unusable; without it `RUST_LOG` wins when
/// set.
pub fn init(config: &Config, prefer_level: bool) -> Result<(), AppError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&config.log_level, prefer_level, rust_log.as_deref())?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
                AppError::Logger(format!("failed to open log file '{}': {e}", path.display()))
            })?;
            builder.with_ansi(false).with_writer(BoxMakeWriter::new(file)).try_init()
        }
        None => builder.with_writer(BoxMakeWriter::new(std::io::stderr)).try_init(),
    };
    installed.map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

/// Parse a plain level name (`error` .. `trace`, or `off`).
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    let level = level.trim();
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

fn configured_filter(level: &str) -> Result<EnvFilter, AppError> {
    let level = parse_level(level)?;
    let directives = std::iter::once(level.to_string().to_lowercase())
        .chain(QUIET_TARGETS.iter().map(|t| t.to_string()))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(&directives)
        .map_err(|e| AppError::Logger(format!("bad filter '{directives}': {e}")))
}

fn env_filter(rust_log: Option<&str>) -> Option<Result<EnvFilter, AppError>> {
    let raw = rust_log.map(str::trim).filter(|s| !s.is_empty())?;
    Some(EnvFilter::try_new(raw).map_err(|e| AppError::Logger(format!("invalid RUST_LOG '{raw}': {e}"))))
}

fn build_filter(level: &str, prefer_level: bool, rust_log: Option<&str>) -> Result<EnvFilter, AppError> {
    if prefer_level {
        return match configured_filter(level) {
            Ok(filter) => Ok(filter),
            Err(level_err) => match env_filter(rust_log) {
                Some(Ok(filter)) => Ok(filter),
                Some(Err(env_err)) => Err(AppError::Logger(format!("{level_err}; {env_err}"))),
                None => Err(level_err),
            },
        };
    }

    match env_filter(rust_log) {
        Some(Ok(filter)) => Ok(filter),
        _ => configured_filter(level),
    }
}
