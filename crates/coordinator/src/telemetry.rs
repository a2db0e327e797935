//! Logging setup for binaries and tests embedding the orchestration system.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,proctor_coordinator=debug,proctor_agents=debug";

/// Install the global subscriber: `RUST_LOG` if set, else `default_filter`.
///
/// Panics if a global subscriber is already installed; use
/// [`try_init_tracing`] where that can happen.
pub fn init_tracing(default_filter: &str) {
    registry(default_filter).init();
}

/// Like [`init_tracing`], but reports an already-installed subscriber as an
/// error instead of panicking.
pub fn try_init_tracing(default_filter: &str) -> Result<(), TryInitError> {
    registry(default_filter).try_init()
}

fn registry(default_filter: &str) -> impl SubscriberInitExt {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
}
