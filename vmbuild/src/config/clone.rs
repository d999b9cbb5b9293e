//! Configuration for building a VM by cloning a template.

use super::{check_networks, effective_networks};
use serde::{Deserialize, Serialize};
use vmbuild_shared::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Name of the source template.
    pub template: String,
    /// Primary disk size in MiB after cloning; 0 keeps the template's size.
    pub disk_size: i64,
    /// Share storage with the template instead of copying its disks.
    pub linked_clone: bool,
    pub network: String,
    pub networks: Vec<String>,
    pub network_card: String,
    pub notes: String,
}

impl CloneConfig {
    pub fn prepare(&self) -> Vec<ConfigError> {
        let mut errs = Vec::new();

        if self.template.is_empty() {
            errs.push(ConfigError::MissingTemplate);
        }

        if self.linked_clone && self.disk_size != 0 {
            errs.push(ConfigError::LinkedCloneWithDiskSize);
        } else if self.disk_size < 0 {
            errs.push(ConfigError::NegativeDiskSize(self.disk_size));
        }

        check_networks(&self.network, &self.networks, &mut errs);

        errs
    }

    pub fn network_list(&self) -> Vec<String> {
        effective_networks(&self.network, &self.networks)
    }

    /// Size the primary disk is grown to after cloning, when positive.
    pub fn resize_target(&self) -> Option<i64> {
        (self.disk_size > 0).then_some(self.disk_size)
    }
}
