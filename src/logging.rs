//! `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::Environment;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(environment: Environment) -> &'static str {
    match environment {
        Environment::Development => "inkcalc=debug,tower_http=debug,info",
        Environment::Production => "info",
    }
}

/// Install the global fmt subscriber. `RUST_LOG` wins over the environment
/// default. Calling it twice is harmless.
pub fn init(environment: Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(environment)));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(?environment, "logging initialized");
    }
}
