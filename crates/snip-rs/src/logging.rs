//! Log setup shared by the `snip` and `snip-proxy` binaries.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding the log filter (`EnvFilter` syntax).
pub const LOG_ENV: &str = "SNIP_LOG";

/// Install a stderr formatter filtered by `SNIP_LOG` (default `info`).
///
/// `verbose` raises the default to `debug` for snip's own crates. Calling it
/// twice is harmless; the second call is ignored.
pub fn init(verbose: bool) {
    let default = if verbose {
        "info,snip_rs=debug,snip_proxy=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
