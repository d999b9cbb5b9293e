//! Step configuration and validation.
//!
//! Every config type exposes a `prepare()` that collects *all* validation
//! failures instead of stopping at the first one, so callers can report
//! everything at once before any step runs.

mod build;
mod clone;
mod create;
mod disk;
mod location;

pub use build::BuildConfig;
pub use clone::CloneConfig;
pub use create::{CreateConfig, DEFAULT_GUEST_OS_TYPE, Firmware};
pub use disk::DiskConfig;
pub use location::LocationConfig;

use vmbuild_shared::ConfigError;

/// Validate the legacy single `network` option against the `networks` list.
pub(crate) fn check_networks(network: &str, networks: &[String], errs: &mut Vec<ConfigError>) {
    if !network.is_empty() && !networks.is_empty() {
        errs.push(ConfigError::NetworkAndNetworks);
    }
}

/// Effective network list: `networks`, or the legacy `network` when set.
pub(crate) fn effective_networks(network: &str, networks: &[String]) -> Vec<String> {
    if networks.is_empty() && !network.is_empty() {
        vec![network.to_string()]
    } else {
        networks.to_vec()
    }
}
