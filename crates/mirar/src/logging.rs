//! Log subscriber setup for test binaries.
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! whoever runs the tests.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "mirar=info";

/// Install a stderr fmt subscriber driven by `RUST_LOG`.
///
/// Returns `false` when a global subscriber was already installed, which
/// makes repeated calls from several tests harmless.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
