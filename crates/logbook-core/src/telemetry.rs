//! Centralised tracing initialisation for Logbook binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting, or
//! [`init_tracing_with_sink`] to also forward events into a [`LogSink`].
//!
//! Subsequent calls are silently ignored; the global subscriber can only be
//! set once per process.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::sink::{LogSink, SinkLayer};

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
pub fn init_tracing(json: bool, level: Level) {
    if json {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// Like [`init_tracing`], and every event that passes the filter is also
/// written to `sink`.
pub fn init_tracing_with_sink(json: bool, level: Level, sink: LogSink) {
    if json {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt::layer().with_target(false).json())
            .with(SinkLayer::new(sink))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(fmt::layer().with_target(false))
            .with(SinkLayer::new(sink))
            .try_init()
            .ok();
    }
}
