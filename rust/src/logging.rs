use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "bluebubbles_core=info";

/// Installs a global fmt subscriber honouring `RUST_LOG`. Safe to call more
/// than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
