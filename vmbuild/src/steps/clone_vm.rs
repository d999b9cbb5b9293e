//! Step: clone a VM from an existing template.

use super::{
    cancellable, destroy_owned_vm, ensure_target_free, halt, record_vm, resize_if_requested,
    settle_materialize, step_start,
};
use crate::config::{CloneConfig, LocationConfig};
use crate::driver::CloneSpec;
use crate::pipeline::{Step, StepAction};
use crate::state::StateBag;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vmbuild_shared::{VmbuildError, VmbuildResult};

pub struct StepCloneVm {
    config: CloneConfig,
    location: LocationConfig,
    force: bool,
}

impl StepCloneVm {
    pub fn new(config: CloneConfig, location: LocationConfig, force: bool) -> Self {
        Self {
            config,
            location,
            force,
        }
    }

    async fn clone_from_template(
        &self,
        cancel: &CancellationToken,
        state: &mut StateBag,
    ) -> VmbuildResult<()> {
        let vm_name = &self.location.vm_name;
        let survivor = ensure_target_free(cancel, state, vm_name, self.force).await?;

        state.ui().say("Cloning VM...");
        let driver = state.driver();
        let template = cancellable(cancel, driver.find_vm(&self.config.template))
            .await?
            .ok_or_else(|| VmbuildError::TemplateNotFound(self.config.template.clone()))?;

        let spec = CloneSpec::new(&self.location, &self.config);
        let cloned = cancellable(cancel, driver.clone_vm(cancel, &template, &spec)).await;
        let vm = settle_materialize(
            state,
            vm_name,
            survivor.as_ref(),
            cloned,
            VmbuildError::clone_failed,
        )
        .await?
        .ok_or_else(|| {
            VmbuildError::clone_failed(VmbuildError::Driver(
                "clone finished without producing a vm".into(),
            ))
        })?;

        record_vm(state, &vm).await?;
        tracing::info!(
            vm = %vm,
            template = %template,
            linked = spec.linked_clone,
            "Cloned vm"
        );

        resize_if_requested(cancel, state, &vm, self.config.resize_target()).await
    }
}

#[async_trait]
impl Step for StepCloneVm {
    async fn run(&self, cancel: &CancellationToken, state: &mut StateBag) -> StepAction {
        let step = self.name();
        step_start(state, step);

        match self.clone_from_template(cancel, state).await {
            Ok(()) => StepAction::Continue,
            Err(e) => halt(state, step, e),
        }
    }

    async fn cleanup(&self, state: &mut StateBag) {
        destroy_owned_vm(state, self.name()).await;
    }

    fn name(&self) -> &str {
        "clone_vm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{DriverCall, InMemoryDriver, Operation};
    use crate::ui::{RecordingUi, UiMessage};
    use std::sync::Arc;
    use std::time::Duration;

    fn location() -> LocationConfig {
        LocationConfig {
            vm_name: "web-01".into(),
            host: "esx-01".into(),
            ..Default::default()
        }
    }

    fn config() -> CloneConfig {
        CloneConfig {
            template: "ubuntu-base".into(),
            ..Default::default()
        }
    }

    fn setup(driver: InMemoryDriver) -> (Arc<InMemoryDriver>, Arc<RecordingUi>, StateBag) {
        let driver = Arc::new(driver);
        let ui = Arc::new(RecordingUi::new());
        let state = StateBag::new(ui.clone(), driver.clone());
        (driver, ui, state)
    }

    #[tokio::test]
    async fn test_clones_template() {
        let (driver, ui, mut state) = setup(InMemoryDriver::new().with_template("ubuntu-base"));
        let step = StepCloneVm::new(config(), location(), false);

        let action = step.run(&CancellationToken::new(), &mut state).await;

        assert_eq!(action, StepAction::Continue);
        assert_eq!(state.vm().map(|vm| vm.name()), Some("web-01"));
        assert!(driver.calls().contains(&DriverCall::Clone {
            template: "ubuntu-base".into(),
            name: "web-01".into(),
        }));
        assert!(ui.messages().contains(&UiMessage::Say("Cloning VM...".into())));
    }

    #[tokio::test]
    async fn test_linked_clone_and_networks() {
        let (driver, _ui, mut state) = setup(InMemoryDriver::new().with_template("ubuntu-base"));
        let config = CloneConfig {
            linked_clone: true,
            networks: vec!["lan".into(), "storage".into()],
            notes: "from template".into(),
            ..config()
        };
        let step = StepCloneVm::new(config, location(), false);

        step.run(&CancellationToken::new(), &mut state).await;

        let record = driver.vm("web-01").unwrap();
        assert_eq!(record.linked_to.as_deref(), Some("ubuntu-base"));
        assert_eq!(record.networks, vec!["lan", "storage"]);
        assert_eq!(record.annotation, "from template");
    }

    #[tokio::test]
    async fn test_missing_template() {
        let (driver, _ui, mut state) = setup(InMemoryDriver::new());
        let step = StepCloneVm::new(config(), location(), false);

        let action = step.run(&CancellationToken::new(), &mut state).await;

        assert_eq!(action, StepAction::Halt);
        assert!(
            matches!(state.error(), Some(VmbuildError::TemplateNotFound(name)) if name == "ubuntu-base")
        );
        assert!(state.vm().is_none());
        assert!(
            !driver
                .calls()
                .iter()
                .any(|c| matches!(c, DriverCall::Clone { .. }))
        );
    }

    #[tokio::test]
    async fn test_existing_target_without_force() {
        let (driver, _ui, mut state) = setup(
            InMemoryDriver::new()
                .with_template("ubuntu-base")
                .with_vm("web-01"),
        );
        let step = StepCloneVm::new(config(), location(), false);

        let action = step.run(&CancellationToken::new(), &mut state).await;

        assert_eq!(action, StepAction::Halt);
        assert_eq!(
            state.error().map(|e| e.to_string()).as_deref(),
            Some("web-01 already exists, you can use the force flag to destroy it")
        );
        assert_eq!(driver.destroy_calls(), 0);
        assert!(driver.contains("web-01"));
    }

    #[tokio::test]
    async fn test_force_replaces_existing_target() {
        let (driver, ui, mut state) = setup(
            InMemoryDriver::new()
                .with_template("ubuntu-base")
                .with_vm("web-01"),
        );
        let step = StepCloneVm::new(config(), location(), true);

        let action = step.run(&CancellationToken::new(), &mut state).await;

        assert_eq!(action, StepAction::Continue);
        assert_eq!(driver.destroy_calls(), 1);
        assert!(ui.messages().contains(&UiMessage::Say(
            "the vm/template web-01 already exists, but deleting it due to force flag".into()
        )));
        assert!(state.error().is_none());
    }

    #[tokio::test]
    async fn test_clone_failure_wrapped() {
        let (driver, _ui, mut state) = setup(InMemoryDriver::new().with_template("ubuntu-base"));
        driver.fail_on(Operation::Clone, "datastore full");
        let step = StepCloneVm::new(config(), location(), false);

        let action = step.run(&CancellationToken::new(), &mut state).await;

        assert_eq!(action, StepAction::Halt);
        assert!(matches!(state.error(), Some(VmbuildError::CloneFailed(_))));
        assert!(state.vm().is_none());
    }

    #[tokio::test]
    async fn test_empty_clone_result_is_failure() {
        let (driver, _ui, mut state) = setup(InMemoryDriver::new().with_template("ubuntu-base"));
        driver.return_empty_clones();
        let step = StepCloneVm::new(config(), location(), false);

        let action = step.run(&CancellationToken::new(), &mut state).await;

        assert_eq!(action, StepAction::Halt);
        assert!(matches!(state.error(), Some(VmbuildError::CloneFailed(_))));
        assert!(state.vm().is_none());
    }

    #[tokio::test]
    async fn test_resize_after_clone() {
        let (driver, _ui, mut state) = setup(InMemoryDriver::new().with_template("ubuntu-base"));
        let config = CloneConfig {
            disk_size: 32768,
            ..config()
        };
        let step = StepCloneVm::new(config, location(), false);

        let action = step.run(&CancellationToken::new(), &mut state).await;

        assert_eq!(action, StepAction::Continue);
        assert_eq!(driver.vm("web-01").unwrap().disk_size_mb, Some(32768));
    }

    #[tokio::test]
    async fn test_resize_failure_then_cleanup() {
        let (driver, _ui, mut state) = setup(InMemoryDriver::new().with_template("ubuntu-base"));
        driver.fail_on(Operation::Resize, "unsupported");
        let config = CloneConfig {
            disk_size: 32768,
            ..config()
        };
        let step = StepCloneVm::new(config, location(), false);

        let action = step.run(&CancellationToken::new(), &mut state).await;
        assert_eq!(action, StepAction::Halt);
        assert!(state.vm().is_some());

        state.mark_halted();
        step.cleanup(&mut state).await;

        assert!(!driver.contains("web-01"));
        assert!(driver.contains("ubuntu-base"));
        assert!(state.vm().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_clone_adopts_vm_left_on_platform() {
        let (driver, _ui, mut state) = setup(InMemoryDriver::new().with_template("ubuntu-base"));
        driver.set_latency(Duration::from_secs(60));
        let step = StepCloneVm::new(config(), location(), false);
        let cancel = CancellationToken::new();

        // Two lookups take 120s; the clone task is then cut off.
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            trigger.cancel();
        });
        let action = step.run(&cancel, &mut state).await;

        assert_eq!(action, StepAction::Halt);
        assert!(matches!(state.error(), Some(VmbuildError::Cancelled)));
        assert_eq!(state.vm().map(|vm| vm.name()), Some("web-01"));

        state.mark_cancelled();
        step.cleanup(&mut state).await;
        assert!(!driver.contains("web-01"));
        assert_eq!(driver.inventory(), vec!["ubuntu-base"]);
    }
}
