//! Tracing subscriber bootstrap

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::EngineConfig;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Calling this more than once, or
/// after another subscriber was installed, is a no-op.
pub fn init(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Install the subscriber with the filter from `[logging]`
pub fn init_from_config(config: &EngineConfig) {
    init(&config.logging.filter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("debug");
        init("info");
        tracing::info!("logging initialised twice without panicking");
    }

    #[test]
    fn test_init_from_config() {
        let mut config = EngineConfig::default();
        config.logging.filter = "audio_stream_engine=trace".to_string();
        init_from_config(&config);
        tracing::trace!("configured filter accepted");
    }
}
