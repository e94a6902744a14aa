//! Logging setup for `ybtp`.
//!
//! Log lines go to stderr so stdout stays free for reports, which lets
//! `ybtp --json run > report.json` produce a parseable file.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber, writing to stderr. `RUST_LOG` overrides
/// `level`. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    log_subscriber(json, level, std::io::stderr).try_init().ok();
}

/// Subscriber writing text or newline-delimited JSON to `writer`. JSON lines
/// carry the enclosing `release` span so the tag travels with every event.
pub fn log_subscriber<W>(
    json: bool,
    level: Level,
    writer: W,
) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let text = (!json).then(|| fmt::layer().with_writer(writer.clone()));
    let structured = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(structured)
}

/// Span around one release run. `tag` is recorded once the checkout knows it.
pub fn release_span(os_tag: &str) -> tracing::Span {
    tracing::info_span!("release", os = %os_tag, tag = tracing::field::Empty)
}
