//! Step: create a VM from guest OS, disk and network settings.

use super::{
    cancellable, destroy_owned_vm, ensure_target_free, halt, record_vm, resize_if_requested,
    settle_materialize, step_start,
};
use crate::config::{CreateConfig, LocationConfig};
use crate::driver::CreateSpec;
use crate::pipeline::{Step, StepAction};
use crate::state::StateBag;
use async_trait::async_trait;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;
use vmbuild_shared::{VmbuildError, VmbuildResult};

pub struct StepCreateVm {
    config: CreateConfig,
    location: LocationConfig,
    force: bool,
    http_ip: Option<IpAddr>,
}

impl StepCreateVm {
    /// `config` is expected to have passed [`CreateConfig::prepare`].
    pub fn new(config: CreateConfig, location: LocationConfig, force: bool) -> Self {
        Self {
            config,
            location,
            force,
            http_ip: None,
        }
    }

    /// Address of the build's HTTP server, published to later steps.
    pub fn with_http_ip(mut self, ip: IpAddr) -> Self {
        self.http_ip = Some(ip);
        self
    }

    async fn create(&self, cancel: &CancellationToken, state: &mut StateBag) -> VmbuildResult<()> {
        let vm_name = &self.location.vm_name;
        let survivor = ensure_target_free(cancel, state, vm_name, self.force).await?;

        if let Some(ip) = self.http_ip {
            state.set_http_ip(ip);
        }

        state.ui().say("Creating VM...");
        let spec = CreateSpec::new(&self.location, &self.config);
        let driver = state.driver();
        let created = cancellable(cancel, driver.create_vm(cancel, &spec)).await;
        let vm = settle_materialize(
            state,
            vm_name,
            survivor.as_ref(),
            created,
            VmbuildError::creation_failed,
        )
        .await?;

        record_vm(state, &vm).await?;
        tracing::info!(
            vm = %vm,
            guest_os = %spec.guest_os,
            disks = spec.storage.len(),
            "Created vm"
        );

        resize_if_requested(cancel, state, &vm, self.config.resize_target()).await
    }
}

#[async_trait]
impl Step for StepCreateVm {
    async fn run(&self, cancel: &CancellationToken, state: &mut StateBag) -> StepAction {
        let step = self.name();
        step_start(state, step);

        match self.create(cancel, state).await {
            Ok(()) => StepAction::Continue,
            Err(e) => halt(state, step, e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        destroy_owned_vm(state, self.name()).await;
    }

    fn name(&self) -> &str {
        "create_vm"
    }
}
