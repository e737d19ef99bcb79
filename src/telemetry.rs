use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use tracing_subscriber::util::TryInitError as TracingError;

/// Installs a fmt subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Returns an error instead of panicking if a subscriber is already installed.
pub fn try_init_tracing() -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
}
