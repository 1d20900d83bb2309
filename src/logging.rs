//! Tracing subscriber setup

use crate::config::Environment;
use tracing_subscriber::EnvFilter;

/// Initialise the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. Production emits one JSON object
/// per line; other environments use the human readable formatter. Calling
/// this more than once keeps the first subscriber.
pub fn init_logging(level: &str, environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if environment.is_production() {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("debug", Environment::Test);
        init_logging("info", Environment::Production);
    }
}
