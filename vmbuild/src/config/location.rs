use serde::{Deserialize, Serialize};
use vmbuild_shared::ConfigError;

/// Where a VM is materialized on the platform.
///
/// `vm_name` doubles as the idempotency key for existence checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub vm_name: String,
    pub folder: String,
    pub cluster: String,
    pub host: String,
    pub resource_pool: String,
    pub datastore: String,
}

impl LocationConfig {
    pub fn prepare(&self) -> Vec<ConfigError> {
        let mut errs = Vec::new();

        if self.vm_name.is_empty() {
            errs.push(ConfigError::MissingVmName);
        }
        if self.host.is_empty() && self.cluster.is_empty() {
            errs.push(ConfigError::MissingHostOrCluster);
        }

        errs
    }
}
