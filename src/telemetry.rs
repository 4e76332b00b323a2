use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install structured JSON logging on stdout.
/// The level is controlled with the RUST_LOG environment variable (default `info`).
pub fn init_telemetry() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .json();

    // A host application may already own the global subscriber.
    if tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}
