//! Tracing setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a console `fmt` subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Safe to call more than once: if a
/// global subscriber is already set (tests, embedding apps) this is a no-op.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true),
        )
        .try_init();

    if result.is_err() {
        tracing::debug!("global tracing subscriber already initialized");
    }
}
