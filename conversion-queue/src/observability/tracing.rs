//! Process-wide tracing setup.

/// Initialize JSON logging filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(false)
        .try_init();
}

#[cfg(all(test, feature = "tracing-basic"))]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
