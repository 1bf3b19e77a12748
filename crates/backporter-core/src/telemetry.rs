//! Centralised tracing initialisation for backporter binaries.
//!
//! Call [`init_tracing`] once at program start to configure the global
//! subscriber with an `EnvFilter` and optional JSON formatting.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// Logs go to stderr so stdout carries only tool output and the final patch.
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    build_subscriber(json, level, std::io::stderr).try_init().ok();
}

/// The subscriber [`init_tracing`] installs, writing to `writer`.
pub fn build_subscriber<W>(json: bool, level: Level, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(writer.clone())
            .json()
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
}
