use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "bidwire=debug,tower_http=debug";

/// Where log output goes, chosen once at start
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    /// Human-readable lines on stdout
    #[default]
    Console,
    /// JSON lines for a log collector
    Cloud,
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init(backend: LogBackend) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match backend {
        LogBackend::Console => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogBackend::Cloud => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    }
}
