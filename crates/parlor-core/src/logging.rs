//! Tracing subscriber setup for the server binary.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` is applied to the
/// parlor crates and `warn` to everything else. Safe to call more than once
/// (subsequent calls are no-ops), which keeps tests that share a process
/// from panicking.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,parlor={default_level},parlor_core={default_level},parlor_store={default_level},parlor_engine={default_level},parlor_server={default_level}"
        ))
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
