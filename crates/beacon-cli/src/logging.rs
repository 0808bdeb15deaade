//! Stderr logging controlled by `BEACON_LOG`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "BEACON_LOG";

/// Installs the global subscriber. `verbose` raises the default from `warn`
/// to `debug`; an explicit `BEACON_LOG` always wins.
pub fn init(verbose: bool) {
    let default = if verbose { "beacon=debug,beacon_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
