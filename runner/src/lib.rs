pub mod cancel;
pub mod command;
pub mod config;
pub mod flush;
pub mod liveness;
pub mod nodeset;
pub mod reconcile;
pub mod resmgr;
pub mod scavenge;
pub mod watchdog;

#[cfg(test)]
mod testing;

use tracing_subscriber::EnvFilter;

/// log to stderr, `RUST_LOG` overrides the default `info` level
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
