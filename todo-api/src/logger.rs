//! Process-wide `tracing` subscriber.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::{config::Config, error::LoggerError};

/// Installs the global subscriber. Called once by the binary before anything
/// logs; a second call fails with `LoggerError::Init`.
pub fn init(config: &Config) -> Result<(), LoggerError> {
    let filter = EnvFilter::try_new(&config.logger.level)?;

    let output: Box<dyn Layer<Registry> + Send + Sync> = if config.is_local() {
        fmt::layer().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().json().with_current_span(true).boxed()
    };

    tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .try_init()?;
    Ok(())
}
