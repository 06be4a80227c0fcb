//! Tracing initialisation.

use shipindex_core::config::LogConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive string: the global level, then per-component overrides such as
/// `shipindex_stream=debug`.
fn directives(config: &LogConfig) -> String {
    let mut components: Vec<_> = config.components.iter().collect();
    components.sort();
    let mut directives = config.level.clone();
    for (component, level) in components {
        directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
    }
    directives
}

/// Install the global subscriber. Call once, before the session starts.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(directives(config)).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_names_become_targets() {
        let mut config = LogConfig::default();
        config.components.insert("shipindex-stream".into(), "debug".into());
        config.components.insert("shipindex-abi".into(), "warn".into());
        assert_eq!(
            directives(&config),
            "info,shipindex_abi=warn,shipindex_stream=debug"
        );
    }
}
