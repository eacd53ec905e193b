//! Tracing-subscriber initialization.
//!
//! Call [`init_logging`] once at startup, before constructing the
//! server. The level is controlled with `RUST_LOG`
//! (`RUST_LOG=mazurka_core=trace` shows per-session traces).

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging with sensible defaults (`info` unless `RUST_LOG`
/// says otherwise).
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize logging at a fixed level, ignoring `RUST_LOG` absence.
pub fn init_logging_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
