//! `tracing` subscriber setup.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "SOCKS5_PROXY_LOG";

/// Installs the global `tracing` subscriber. `verbose` raises the default filter
/// from `info` to `debug`; `SOCKS5_PROXY_LOG` always takes precedence when set.
pub fn init(verbose: bool) {
    let default_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
