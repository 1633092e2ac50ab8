//! Logging setup
//!
//! Chronicle logs through `tracing`. Host applications usually install their
//! own subscriber; [`init`] is a convenience for binaries and tests that do not.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init() -> bool {
    init_with_default("info")
}

/// Install a fmt subscriber, falling back to `default_filter` when `RUST_LOG`
/// is unset or unparsable.
pub fn init_with_default(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok()
}
