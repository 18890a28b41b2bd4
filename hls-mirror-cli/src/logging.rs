use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::LogFormat;
use crate::error::{AppError, Result};

const DEFAULT_LOG_FILTER: &str = "hls_mirror=info,hls_mirror_engine=info";
const VERBOSE_LOG_FILTER: &str = "hls_mirror=debug,hls_mirror_engine=debug";

/// `RUST_LOG` wins when set; otherwise `verbose` picks between info and debug.
pub fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    })
}

pub fn init_logging(verbose: bool, format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter(verbose));
    let result = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(verbose))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
    };
    result.map_err(|e| AppError::Logging(e.to_string()))
}
