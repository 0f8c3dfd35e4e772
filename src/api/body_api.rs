//! Body API
//!
//! Logging setup and the process-wide decode dispatcher.

use anyhow::Context;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use std::path::Path;

use crate::decode::{DecodeDispatcher, DecodeError, DispatcherConfig};

static DISPATCHER: OnceCell<DecodeDispatcher> = OnceCell::new();

/// Get the version of the body core library
pub fn get_version() -> String {
    crate::VERSION.to_string()
}

/// Initialize logging (call once at startup).
///
/// Logs go to stderr, or to a daily rolling file under `log_dir` when given.
/// Calling this again after a subscriber is installed is not an error.
pub fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let level = resolve_log_level();

    match log_dir {
        None => {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .try_init();
        }
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "exchange_body_core");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Logging lasts until process exit
            std::mem::forget(guard);

            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(non_blocking)
                .try_init();
        }
    }

    tracing::info!("Exchange body core initialized v{}", get_version());
    Ok(())
}

fn resolve_log_level() -> tracing::level_filters::LevelFilter {
    parse_log_level(std::env::var("RUST_LOG").ok().as_deref())
}

fn parse_log_level(value: Option<&str>) -> tracing::level_filters::LevelFilter {
    use tracing::level_filters::LevelFilter;

    match value.map(str::to_lowercase).as_deref() {
        Some("trace") => LevelFilter::TRACE,
        Some("debug") => LevelFilter::DEBUG,
        Some("warn") | Some("warning") => LevelFilter::WARN,
        Some("error") => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

pub fn create_default_config() -> DispatcherConfig {
    DispatcherConfig::default()
}

/// Install the process-wide dispatcher. Later calls keep the existing one.
pub fn init_decoder(config: DispatcherConfig) -> anyhow::Result<DecodeDispatcher> {
    DISPATCHER
        .get_or_try_init(|| DecodeDispatcher::new(config))
        .cloned()
}

/// The process-wide dispatcher, started with environment-derived defaults on
/// first use.
pub fn dispatcher() -> anyhow::Result<DecodeDispatcher> {
    init_decoder(DispatcherConfig::from_env())
}

/// Decode a captured body off the calling thread.
pub async fn decode_content(
    body: impl Into<Bytes>,
    encoding: Option<&str>,
) -> Result<Bytes, DecodeError> {
    let dispatcher = dispatcher().map_err(|e| DecodeError::Transport {
        attempts: 0,
        message: format!("{:#}", e),
    })?;
    dispatcher.decode(body.into(), encoding).await
}
