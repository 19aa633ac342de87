//! Tracing subscriber setup.

use taf_engine::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set and valid, else the configured level, else `info`.
#[must_use]
pub fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber, writing to stderr since stdout carries
/// protocol traffic.
pub fn init(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(config)).with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
