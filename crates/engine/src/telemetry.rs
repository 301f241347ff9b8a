#![forbid(unsafe_code)]

use crate::EngineConfig;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TABULA_LOG";

/// `TABULA_LOG`, then `RUST_LOG`, then the configured directive.
fn env_filter(config: &EngineConfig) -> EnvFilter {
    let directive = [LOG_ENV, "RUST_LOG"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| config.log_filter.clone());
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global fmt subscriber. Returns `false` when one is already
/// installed, so repeated calls are harmless.
pub fn init_tracing(config: &EngineConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_ansi(config.log_ansi)
        .with_target(false)
        .try_init()
        .is_ok()
}
