//! Logging setup for the bakery.

use crate::config::LoggingSettings;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives for a configured level. Store operations are traced
/// per call, so they stay at info unless tracing everything.
fn directives(level: &str) -> String {
    match level {
        "debug" => "debug,layer_baker::store=info".to_string(),
        other => other.to_string(),
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Timestamps are time since start, which reads directly as bake progress.
/// JSON output keeps the current span, so every line carries the layer and
/// the box being subdivided.
pub fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(&config.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_timer(fmt::time::uptime()),
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_timer(fmt::time::uptime()))
            .try_init()?;
    }

    debug!(level = %config.level, json = config.json_format, "Logging ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_keeps_store_quiet() {
        assert_eq!(directives("debug"), "debug,layer_baker::store=info");
        assert!(directives("debug").parse::<EnvFilter>().is_ok());
        for level in ["trace", "info", "warn", "error"] {
            assert_eq!(directives(level), level);
        }
    }
}
