pub mod storage;

pub use storage::ObservedStorage;

/// Install a global `tracing` subscriber with `RUST_LOG`-style filtering.
///
/// Safe to call more than once; later calls are no-ops (useful in tests).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
