use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::settings::LogSettings;

/// Filter directive for the configured level. `RUST_LOG` wins when set.
pub fn filter_directive(settings: &LogSettings) -> String {
    std::env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| format!("local_translate_lib={}", settings.level))
}

/// Install the global subscriber. Returns false if one was already set,
/// so calling it twice (tests, embedding apps) is harmless.
pub fn init_logging(settings: &LogSettings) -> bool {
    let filter = EnvFilter::try_new(filter_directive(settings)).unwrap_or_else(|e| {
        eprintln!("Invalid log filter '{}': {}", settings.level, e);
        EnvFilter::new("local_translate_lib=info")
    });

    let json_layer = settings.json.then(|| fmt::layer().json().with_target(true));
    let text_layer = (!settings.json).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let settings = LogSettings::default();
        let _ = init_logging(&settings);
        assert!(!init_logging(&settings));
    }
}
