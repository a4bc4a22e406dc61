//! Tracing subscriber setup for the `polymath` binary.
//!
//! Logs go to stderr so stdout stays reserved for command output (query
//! context, inspection summaries). `RUST_LOG` overrides the default filter.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "polymath=info,polymath_core=info";
const VERBOSE_FILTER: &str = "polymath=debug,polymath_core=debug";

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_FILTER
        } else {
            DEFAULT_FILTER
        })
    });

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
