// SPDX-License-Identifier: MPL-2.0

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "franky_sync=info";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Returns false when a global subscriber was already set (for example by
/// the embedding application), in which case that one stays in charge.
pub fn init() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
