//! Process-wide `tracing` subscriber.

use crate::core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber on stderr so stdout stays machine-readable.
///
/// `RUST_LOG` wins over the configured filter. Calling this twice is harmless.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("techpath=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
