use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

pub const LOG_ENV: &str = "RELAY_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the global subscriber. Logs go to stderr so stdout stays
/// reserved for JSON results.
pub fn init_logging(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Human => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}
