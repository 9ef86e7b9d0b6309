use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "licensing_harvester=debug"
    } else {
        "licensing_harvester=info"
    }
}

/// Installs a fmt subscriber. `RUST_LOG` takes precedence over `verbose`.
///
/// # Errors
///
/// Returns [`TelemetryError::Init`] if a global subscriber is already
/// installed.
pub fn init_tracing(verbose: bool) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))
}
