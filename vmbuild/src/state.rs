//! Execution context shared by every step of one pipeline run.
//!
//! One [`StateBag`] exists per run. The runner owns it and lends it to one
//! step at a time, so no locking is involved.

use crate::driver::{SharedDriver, VmHandle};
use crate::ui::SharedUi;
use std::fmt;
use std::net::IpAddr;
use ulid::Ulid;
use vmbuild_shared::{VmbuildError, VmbuildResult};

/// Identifier of one pipeline run, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(Ulid);

impl RunId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Last 8 characters, enough to tell concurrent runs apart in logs.
    pub fn short(&self) -> String {
        let s = self.0.to_string();
        s[s.len() - 8..].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub struct StateBag {
    run_id: RunId,
    ui: SharedUi,
    driver: SharedDriver,
    /// Set by the create/clone step; absent means there is nothing to destroy.
    vm: Option<VmHandle>,
    http_ip: Option<IpAddr>,
    error: Option<VmbuildError>,
    cancelled: bool,
    halted: bool,
}

impl StateBag {
    pub fn new(ui: SharedUi, driver: SharedDriver) -> Self {
        Self {
            run_id: RunId::new(),
            ui,
            driver,
            vm: None,
            http_ip: None,
            error: None,
            cancelled: false,
            halted: false,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn ui(&self) -> SharedUi {
        self.ui.clone()
    }

    pub fn driver(&self) -> SharedDriver {
        self.driver.clone()
    }

    pub fn vm(&self) -> Option<&VmHandle> {
        self.vm.as_ref()
    }

    /// Record the VM produced by this run.
    ///
    /// A run owns at most one VM: storing a second one without destroying
    /// the first is refused.
    pub fn put_vm(&mut self, vm: VmHandle) -> VmbuildResult<()> {
        if let Some(existing) = &self.vm {
            return Err(VmbuildError::Internal(format!(
                "run already owns vm {}, refusing to record {}",
                existing, vm
            )));
        }
        self.vm = Some(vm);
        Ok(())
    }

    /// Give up ownership of the VM (after destroying it, or to hand it to
    /// the caller).
    pub fn take_vm(&mut self) -> Option<VmHandle> {
        self.vm.take()
    }

    pub fn http_ip(&self) -> Option<IpAddr> {
        self.http_ip
    }

    pub fn set_http_ip(&mut self, ip: IpAddr) {
        self.http_ip = Some(ip);
    }

    pub fn error(&self) -> Option<&VmbuildError> {
        self.error.as_ref()
    }

    /// Record the run's error, replacing any previous one.
    pub fn set_error(&mut self, error: VmbuildError) {
        self.error = Some(error);
    }

    pub fn take_error(&mut self) -> Option<VmbuildError> {
        self.error.take()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn mark_halted(&mut self) {
        self.halted = true;
    }

    /// Whether step cleanups should reclaim what they produced.
    pub fn should_rollback(&self) -> bool {
        self.cancelled || self.halted
    }
}

impl fmt::Debug for StateBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateBag")
            .field("run_id", &self.run_id)
            .field("vm", &self.vm)
            .field("http_ip", &self.http_ip)
            .field("error", &self.error)
            .field("cancelled", &self.cancelled)
            .field("halted", &self.halted)
            .finish()
    }
}
