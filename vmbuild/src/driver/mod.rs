//! Virtualization platform driver boundary.
//!
//! The engine only ever talks to the platform through [`Driver`]. Every
//! call may block on a remote operation; none of them are retried here.
//!
//! - lookup: [`Driver::find_vm`]
//! - materialize: [`Driver::create_vm`], [`Driver::clone_vm`]
//! - adjust: [`Driver::resize_disk`]
//! - reclaim: [`Driver::destroy_vm`]

pub mod memory;

use crate::config::{CloneConfig, CreateConfig, DiskConfig, Firmware, LocationConfig};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vmbuild_shared::VmbuildResult;

/// Opaque reference to a VM (or template) on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VmHandle {
    id: String,
    name: String,
}

impl VmHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Platform-assigned identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for VmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Request to build a VM from scratch.
///
/// An empty `storage` list asks the driver for its default primary disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub location: LocationConfig,
    pub guest_os: String,
    pub firmware: Option<Firmware>,
    pub version: u32,
    pub disk_controller_type: String,
    pub global_disk_type: String,
    pub disk_thin_provisioned: bool,
    pub storage: Vec<DiskConfig>,
    pub networks: Vec<String>,
    pub network_card: String,
    pub usb_controller: bool,
    pub annotation: String,
}

impl CreateSpec {
    pub fn new(location: &LocationConfig, config: &CreateConfig) -> Self {
        Self {
            location: location.clone(),
            guest_os: config.guest_os_type.clone(),
            firmware: config.firmware(),
            version: config.vm_version,
            disk_controller_type: config.disk_controller_type.clone(),
            global_disk_type: config.disk_type.clone(),
            disk_thin_provisioned: config.disk_thin_provisioned,
            storage: config.storage.clone(),
            networks: config.network_list(),
            network_card: config.network_card.clone(),
            usb_controller: config.usb_controller,
            annotation: config.notes.clone(),
        }
    }
}

/// Request to clone a template into `location`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSpec {
    pub location: LocationConfig,
    pub linked_clone: bool,
    pub networks: Vec<String>,
    pub network_card: String,
    pub annotation: String,
}

impl CloneSpec {
    pub fn new(location: &LocationConfig, config: &CloneConfig) -> Self {
        Self {
            location: location.clone(),
            linked_clone: config.linked_clone,
            networks: config.network_list(),
            network_card: config.network_card.clone(),
            annotation: config.notes.clone(),
        }
    }
}

/// Remote operations on the virtualization platform.
///
/// Implementations report platform failures as `VmbuildError::Driver`; the
/// calling step wraps them into its own error kind.
///
/// Long-running calls receive the run's cancellation token and should abort
/// the remote task once it fires, returning `VmbuildError::Cancelled`. The
/// calling step may also stop awaiting the call, so a driver cannot rely on
/// being polled to completion.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Look up a VM or template by name.
    async fn find_vm(&self, name: &str) -> VmbuildResult<Option<VmHandle>>;

    async fn create_vm(
        &self,
        cancel: &CancellationToken,
        spec: &CreateSpec,
    ) -> VmbuildResult<VmHandle>;

    /// Clone `template`. `Ok(None)` means the platform reported success but
    /// produced nothing usable.
    async fn clone_vm(
        &self,
        cancel: &CancellationToken,
        template: &VmHandle,
        spec: &CloneSpec,
    ) -> VmbuildResult<Option<VmHandle>>;

    /// Grow the primary disk of `vm` to `size_mb` MiB.
    async fn resize_disk(
        &self,
        cancel: &CancellationToken,
        vm: &VmHandle,
        size_mb: i64,
    ) -> VmbuildResult<()>;

    /// Not cancellable: rollback relies on it after the run was cancelled.
    async fn destroy_vm(&self, vm: &VmHandle) -> VmbuildResult<()>;
}

pub type SharedDriver = Arc<dyn Driver>;
