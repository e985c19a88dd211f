//! Tracing subscriber setup.

use banter_core::config::GeneralConfig;
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` wins over `general.log_level`; `general.log_format = "json"`
/// switches to one JSON object per line.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_tracing(
    general: &GeneralConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if general.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}
