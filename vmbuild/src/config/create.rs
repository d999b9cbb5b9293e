//! Configuration for building a VM from scratch (no source template).

use super::{DiskConfig, check_networks, effective_networks};
use crate::net::resolve_host_ip;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use vmbuild_shared::{ConfigError, VmbuildResult};

/// Guest OS identifier used when none is configured.
pub const DEFAULT_GUEST_OS_TYPE: &str = "otherGuest";

/// Firmware the VM boots with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    Bios,
    Efi,
}

impl Firmware {
    pub const ALL: [Firmware; 2] = [Firmware::Bios, Firmware::Efi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Firmware::Bios => "bios",
            Firmware::Efi => "efi",
        }
    }

    fn allowed() -> String {
        Self::ALL
            .iter()
            .map(|f| format!("'{}'", f.as_str()))
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Firmware {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidFirmware {
                value: s.to_string(),
                allowed: Self::allowed(),
            })
    }
}

/// Create-from-scratch options.
///
/// Two disk layouts are supported:
/// - single disk: `storage` is empty, the driver attaches its default primary
///   disk and the step grows it to `disk_size` after creation;
/// - multi disk: every `storage` entry is created as given and `disk_size`
///   must stay unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateConfig {
    /// Virtual hardware version (0 lets the platform choose).
    pub vm_version: u32,
    pub guest_os_type: String,
    /// `bios`, `efi`, or empty for the platform default.
    pub firmware: String,

    pub disk_controller_type: String,
    /// Global disk type applied to every created disk.
    pub disk_type: String,
    /// Primary disk size in MiB for the single-disk layout.
    pub disk_size: i64,
    pub disk_thin_provisioned: bool,
    pub storage: Vec<DiskConfig>,

    /// Legacy single network name, exclusive with `networks`.
    pub network: String,
    pub networks: Vec<String>,
    pub network_card: String,
    pub usb_controller: bool,

    pub notes: String,
    /// Address the build's HTTP server binds to: a literal IP, an interface
    /// name, or empty for the first non-loopback interface address.
    pub http_ip: String,
}

impl CreateConfig {
    /// Validate and normalize in place.
    ///
    /// An empty guest OS type silently becomes [`DEFAULT_GUEST_OS_TYPE`].
    pub fn prepare(&mut self) -> Vec<ConfigError> {
        let mut errs = Vec::new();

        if self.guest_os_type.is_empty() {
            self.guest_os_type = DEFAULT_GUEST_OS_TYPE.to_string();
        }

        if !self.firmware.is_empty()
            && let Err(e) = self.firmware.parse::<Firmware>()
        {
            errs.push(e);
        }

        if self.disk_size < 0 {
            errs.push(ConfigError::NegativeDiskSize(self.disk_size));
        }
        if self.storage.is_empty() {
            if self.disk_size == 0 {
                errs.push(ConfigError::MissingDiskSize);
            }
        } else {
            if self.disk_size > 0 {
                errs.push(ConfigError::DiskSizeWithStorage);
            }
            errs.extend(
                self.storage
                    .iter()
                    .enumerate()
                    .filter_map(|(i, disk)| disk.prepare(i)),
            );
        }

        check_networks(&self.network, &self.networks, &mut errs);

        errs
    }

    /// Parsed firmware, `None` when unset.
    pub fn firmware(&self) -> Option<Firmware> {
        self.firmware.parse().ok()
    }

    pub fn network_list(&self) -> Vec<String> {
        effective_networks(&self.network, &self.networks)
    }

    /// Size the primary disk must be grown to after creation.
    ///
    /// Only the single-disk layout resizes, and only for a positive size.
    pub fn resize_target(&self) -> Option<i64> {
        (self.storage.is_empty() && self.disk_size > 0).then_some(self.disk_size)
    }

    /// Resolve `http_ip` to a concrete address for the build's HTTP server.
    pub fn resolve_http_ip(&self) -> VmbuildResult<IpAddr> {
        resolve_host_ip(&self.http_ip)
    }
}
