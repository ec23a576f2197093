//! Structured logging setup for the CLI.
//!
//! Logs always go to stderr; stdout is reserved for consumed payloads.

use std::io;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;
use tracing::{warn, Subscriber};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

/// Parses a configured level name, case-insensitively.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(level.trim()).ok()
}

fn output_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer().with_writer(io::stderr).with_target(true);
    match (config.format, config.timestamps) {
        (LogFormat::Json, true) => layer.json().boxed(),
        (LogFormat::Json, false) => layer.json().without_time().boxed(),
        (LogFormat::Text, true) => layer.boxed(),
        (LogFormat::Text, false) => layer.without_time().boxed(),
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(level.unwrap_or(LevelFilter::INFO).into())
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(output_layer(config))
        .try_init()
        .map_err(|e| anyhow!("unable to initialise logging: {e}"))?;

    if level.is_none() {
        warn!(level = %config.level, "Unknown logging level, using INFO");
    }
    Ok(())
}
