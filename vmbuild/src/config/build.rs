//! Top-level build document.

use super::{CloneConfig, CreateConfig, LocationConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use vmbuild_shared::{ConfigError, VmbuildError, VmbuildResult};

/// A complete build request: where the VM goes and how it is produced.
///
/// Exactly one of `create` or `clone` must be present.
///
/// ```json
/// {
///   "location": { "vm_name": "web-01", "cluster": "prod" },
///   "clone": { "template": "ubuntu-2204", "disk_size": 40960 },
///   "force": true,
///   "timeout_secs": 1800
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub location: LocationConfig,
    pub create: Option<CreateConfig>,
    pub clone: Option<CloneConfig>,
    /// Destroy a same-named VM instead of failing with "already exists".
    pub force: bool,
    /// Deadline for the whole run.
    pub timeout_secs: Option<u64>,
}

impl BuildConfig {
    pub fn from_json(json: &str) -> VmbuildResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> VmbuildResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VmbuildError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Validate every section, collecting all failures.
    pub fn prepare(&mut self) -> Vec<ConfigError> {
        let mut errs = self.location.prepare();

        match (&mut self.create, &self.clone) {
            (Some(create), None) => errs.extend(create.prepare()),
            (None, Some(clone)) => errs.extend(clone.prepare()),
            _ => errs.push(ConfigError::SourceRequired),
        }

        errs
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
