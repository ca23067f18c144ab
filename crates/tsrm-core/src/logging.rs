//! Optional `tracing-subscriber` wiring for binaries and tests that embed this crate. Gated
//! behind the `logging-init` feature: the crate itself only ever emits `tracing` events and
//! never assumes a particular subscriber is installed.

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber reading its filter from `RUST_LOG`, defaulting to `info`.
///
/// Intended for binaries and integration tests; library code should never call this. Installing
/// a second global subscriber is a programmer error, so this returns nothing and panics via the
/// underlying `set_global_default` call if one is already installed.
pub fn init_default() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
#[expect(unsafe_code, reason = "std::env::remove_var is unsafe; test-only, single-threaded access")]
mod tests {
    use super::*;

    #[test]
    fn init_default_does_not_panic_without_rust_log_set() {
        // SAFETY: test-only removal of an env var the suite doesn't otherwise rely on, to
        // exercise the "no RUST_LOG set" fallback path deterministically.
        unsafe {
            std::env::remove_var("RUST_LOG");
        }
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        assert_eq!(filter.to_string(), "info");
    }
}
