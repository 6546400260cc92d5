//! JSON fmt subscriber with an `EnvFilter`.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// `RUST_LOG` if it parses, otherwise `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init(default_directive: &str) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(default_directive, "tracing initialised");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init("debug");
        assert!(!init("debug"));
    }

    #[test]
    fn default_directive_is_used_without_rust_log() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(env_filter("warn").to_string(), "warn");
        }
    }
}
