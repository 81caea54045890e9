//! Logging initialization.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose events the default filter lets through.
const CRATES: [&str; 6] = [
    "mdm",
    "mdm_login",
    "mdm_session",
    "mdm_worker",
    "mdm_transport",
    "mdm_accounting",
];

/// Filter directives enabling `level` for every mdm crate.
pub fn directives(level: &str) -> String {
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(level.unwrap_or("info"))))
}

/// Initializes the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise every mdm crate logs at `level`
/// (default `info`).
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init(level: Option<&str>) {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Like [`init`], but returns an error instead of panicking when a
/// subscriber is already installed.
pub fn try_init(level: Option<&str>) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}
