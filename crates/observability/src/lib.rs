//! Process-wide tracing setup shared by the binaries.

pub mod subscriber;

pub use subscriber::{env_filter, DEFAULT_DIRECTIVE};

/// Initialize JSON logging filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init(DEFAULT_DIRECTIVE);
}
