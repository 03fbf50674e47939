//! Logging utilities for Pushgate.
//!
//! Every crate logs through `tracing`; this module installs the subscriber once at
//! process start.

use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber at INFO.
pub fn init() {
    init_with_level(Level::INFO);
}

/// Initialize the tracing subscriber with a specific log level.
///
/// `RUST_LOG` is honoured first; the `pushgate` directive is appended so workspace
/// crates log at `level` unless `RUST_LOG` says otherwise. Calling this twice is
/// harmless: the second registration is ignored.
pub fn init_with_level(level: Level) {
    let result = tracing_subscriber::registry()
        .with(stdout_layer())
        .with(filter_for(level))
        .try_init();

    if result.is_ok() {
        info!("Logging initialized at level: {}", level);
    }
}

/// Like [`init_with_level`] but also writes to a daily rolling file in `dir`.
///
/// The returned guard flushes the file writer on drop and must be held for the
/// lifetime of the process.
pub fn init_with_file(level: Level, dir: &str) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(dir, "pushgate.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let result = tracing_subscriber::registry()
        .with(stdout_layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(filter_for(level))
        .try_init();

    if result.is_ok() {
        info!("Logging initialized at level: {} (files in {})", level, dir);
    }
    guard
}

/// Parses a configured level name, falling back to INFO for unknown values.
pub fn parse_level(name: Option<&str>) -> Level {
    name.and_then(|n| n.parse::<Level>().ok())
        .unwrap_or(Level::INFO)
}

fn filter_for(level: Level) -> EnvFilter {
    let filter = EnvFilter::from_default_env();
    match format!("pushgate={}", level).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn stdout_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_thread_names(true)
}
