//! Tracing subscriber setup.
//!
//! Set `RAYTRACE_TRACE=1` with the `chrome-trace` feature to also write
//! a Chrome trace to `trace.json`.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Subscriber options.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Filter directive; falls back to `RUST_LOG`, then `info`
    pub filter: Option<String>,
    /// Log thread names
    pub thread_names: bool,
}

impl LoggingConfig {
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

/// Keeps the Chrome trace writer alive; flushes on drop.
#[cfg(feature = "chrome-trace")]
pub type TraceGuard = tracing_chrome::FlushGuard;

#[cfg(not(feature = "chrome-trace"))]
#[derive(Debug)]
pub struct TraceGuard(());

/// Install the global subscriber. Later calls do nothing and return `None`.
pub fn init_logging(config: &LoggingConfig) -> Option<TraceGuard> {
    let mut guard = None;
    INIT.call_once(|| guard = install(config));
    guard
}

#[cfg(feature = "chrome-trace")]
fn install(config: &LoggingConfig) -> Option<TraceGuard> {
    let fmt_layer = fmt::layer().with_thread_names(config.thread_names);
    let registry = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer);

    if std::env::var("RAYTRACE_TRACE").ok().as_deref() != Some("1") {
        let _ = registry.try_init();
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    registry.with(chrome_layer).try_init().ok().map(|_| guard)
}

#[cfg(not(feature = "chrome-trace"))]
fn install(config: &LoggingConfig) -> Option<TraceGuard> {
    let fmt_layer = fmt::layer().with_thread_names(config.thread_names);
    let _ = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init();
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::with_filter("warn");
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_none());
    }

    #[test]
    fn test_bad_filter_falls_back() {
        let config = LoggingConfig::with_filter("[[not a filter");
        let _ = config.env_filter();
    }
}
