use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber: a compact fmt layer on stderr filtered by
/// `RUST_LOG` when set, otherwise by `level`. Safe to call more than once;
/// later calls keep the first subscriber.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}

fn filter_for(level: &str) -> EnvFilter {
    let level = level.trim();
    let directive = if level.is_empty() { "info" } else { level };
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init("debug");
        init("warn");
        tracing::debug!("logging initialised");
    }

    #[test]
    fn blank_level_falls_back_to_info() {
        assert_eq!(filter_for("  ").to_string(), "info");
        assert_eq!(filter_for("rocketfeed=trace").to_string(), "rocketfeed=trace");
    }
}
