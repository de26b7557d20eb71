//! Log output for the SDK's own diagnostics.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for the given debug setting.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "warn"
    }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over the debug option. Returns `false` if a global
/// subscriber was already installed.
pub fn init_logging(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    match tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to install log subscriber, keeping the existing one: {}", e);
            false
        }
    }
}
