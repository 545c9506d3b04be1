//! Subscriber setup for the `epochdiag` binary
//!
//! Library code only emits `tracing` events; nothing in the library installs a
//! subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "epoch_diagnostics=info,epochdiag=info";

/// Filter used when `RUST_LOG` is unset and verbose output is requested
pub const VERBOSE_FILTER: &str = "epoch_diagnostics=debug,epochdiag=debug";

/// Install a global formatting subscriber
///
/// `RUST_LOG` overrides the default filter. Calling this twice is a no-op.
pub fn init_logging(verbose: bool) {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
