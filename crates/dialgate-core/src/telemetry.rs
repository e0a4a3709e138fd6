//! Tracing setup for the dialgate daemon.
//!
//! Without `RUST_LOG`, dialgate's own crates log at the requested level and
//! the storage and HTTP client stacks are held at `warn`. Spans log when they
//! close, so every `dialgate.call` span reports how long the call took to
//! resolve.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets that are only interesting when something is wrong.
const QUIET_TARGETS: &[&str] = &["surrealdb", "surrealdb_core", "surrealkv", "hyper", "reqwest"];

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_directives(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Install the global subscriber. `json` selects newline-delimited JSON
/// output. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_span_events(FmtSpan::CLOSE);

    let installed = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_dependencies() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("surrealdb=warn"));
        assert!(directives.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
