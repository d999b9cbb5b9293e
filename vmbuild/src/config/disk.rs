use serde::{Deserialize, Serialize};
use vmbuild_shared::ConfigError;

/// One entry of the multi-disk `storage` list. Sizes are in MiB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub disk_size: i64,
    pub disk_thin_provisioned: bool,
    pub disk_eagerly_scrub: bool,
}

impl DiskConfig {
    pub fn new(disk_size: i64) -> Self {
        Self {
            disk_size,
            ..Default::default()
        }
    }

    pub fn thin(mut self) -> Self {
        self.disk_thin_provisioned = true;
        self
    }

    /// Validate the entry at `index` of the storage list.
    pub fn prepare(&self, index: usize) -> Option<ConfigError> {
        (self.disk_size <= 0).then_some(ConfigError::InvalidStorageSize {
            index,
            size: self.disk_size,
        })
    }
}
