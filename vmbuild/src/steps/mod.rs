//! VM-producing pipeline steps.
//!
//! Both steps follow the same shape:
//! 1. pre-flight: refuse (or, with `force`, destroy) a same-named VM
//! 2. materialize the VM and record it in the state immediately
//! 3. optionally grow the primary disk
//!
//! Their cleanup destroys the recorded VM when the run halted or was
//! cancelled.

mod clone_vm;
mod create_vm;

pub use clone_vm::StepCloneVm;
pub use create_vm::StepCreateVm;

use crate::driver::VmHandle;
use crate::pipeline::StepAction;
use crate::state::StateBag;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use vmbuild_shared::{VmbuildError, VmbuildResult};

fn step_start(state: &StateBag, step: &str) {
    tracing::debug!(run_id = %state.run_id().short(), step = step, "Step started");
}

fn log_step_error(state: &StateBag, step: &str, err: &VmbuildError) {
    tracing::error!(
        run_id = %state.run_id().short(),
        step = step,
        error = %err,
        "Step failed"
    );
}

/// Record `err` as the run's error and halt.
fn halt(state: &mut StateBag, step: &str, err: VmbuildError) -> StepAction {
    log_step_error(state, step, &err);
    state.set_error(err);
    StepAction::Halt
}

/// Await a driver call, abandoning it if the run is cancelled first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = VmbuildResult<T>>,
) -> VmbuildResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VmbuildError::Cancelled),
        result = call => result,
    }
}

/// Wrap a driver error into a step error, leaving cancellation as is.
fn wrap(err: VmbuildError, kind: fn(VmbuildError) -> VmbuildError) -> VmbuildError {
    match err {
        VmbuildError::Cancelled => err,
        other => kind(other),
    }
}

/// Make sure nothing named `vm_name` is in the way.
///
/// Without `force` an existing VM halts the run. With `force` it is
/// destroyed; a failed destroy is reported and recorded but does not stop
/// the step, the following create/clone call decides. The VM whose destroy
/// failed is returned so it is never mistaken for one this run produced.
async fn ensure_target_free(
    cancel: &CancellationToken,
    state: &mut StateBag,
    vm_name: &str,
    force: bool,
) -> VmbuildResult<Option<VmHandle>> {
    let driver = state.driver();
    let Some(existing) = cancellable(cancel, driver.find_vm(vm_name)).await? else {
        return Ok(None);
    };

    if !force {
        return Err(VmbuildError::AlreadyExists(vm_name.to_string()));
    }

    let ui = state.ui();
    ui.say(&format!(
        "the vm/template {} already exists, but deleting it due to force flag",
        vm_name
    ));
    if let Err(e) = cancellable(cancel, driver.destroy_vm(&existing)).await {
        let err = VmbuildError::destroy_failed(vm_name, e);
        tracing::warn!(vm = %existing, error = %err, "Pre-flight destroy failed, continuing");
        ui.error(&err.to_string());
        state.set_error(err);
        return Ok(Some(existing));
    }
    Ok(None)
}

/// Take ownership of a VM left behind by a create/clone call that was
/// abandoned on cancellation.
///
/// The platform may finish a task after its caller stopped waiting. Whatever
/// now answers to `vm_name` is recorded so the step's cleanup destroys it,
/// unless it is `survivor`, the pre-existing VM the pre-flight failed to
/// remove. Lookup failures are only logged.
async fn adopt_abandoned_vm(state: &mut StateBag, vm_name: &str, survivor: Option<&VmHandle>) {
    let found = match state.driver().find_vm(vm_name).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(vm_name = vm_name, error = %e, "Lookup after cancelled call failed");
            return;
        }
    };
    let Some(vm) = found.filter(|vm| Some(vm) != survivor) else {
        return;
    };

    tracing::warn!(
        run_id = %state.run_id().short(),
        vm = %vm,
        "Adopting vm left by cancelled call"
    );
    if let Err(e) = state.put_vm(vm.clone()) {
        tracing::error!(vm = %vm, error = %e, "Run already owns a vm, destroying the abandoned one");
        if let Err(destroy_err) = state.driver().destroy_vm(&vm).await {
            tracing::error!(vm = %vm, error = %destroy_err, "Failed to destroy abandoned vm");
        }
    }
}

/// Settle the outcome of a create/clone call.
///
/// Driver failures are wrapped with `kind`. A cancelled call may still have
/// produced the VM, so it is looked up and adopted before the cancellation
/// is returned.
async fn settle_materialize<T>(
    state: &mut StateBag,
    vm_name: &str,
    survivor: Option<&VmHandle>,
    result: VmbuildResult<T>,
    kind: fn(VmbuildError) -> VmbuildError,
) -> VmbuildResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(VmbuildError::Cancelled) => {
            adopt_abandoned_vm(state, vm_name, survivor).await;
            Err(VmbuildError::Cancelled)
        }
        Err(e) => Err(kind(e)),
    }
}

/// Record a freshly materialized VM before anything else can fail.
///
/// A left-over pre-flight error is discarded: the step got what it needed.
async fn record_vm(state: &mut StateBag, vm: &VmHandle) -> VmbuildResult<()> {
    if let Err(e) = state.put_vm(vm.clone()) {
        // The run already owns a VM; do not leak the new one.
        if let Err(destroy_err) = state.driver().destroy_vm(vm).await {
            tracing::error!(vm = %vm, error = %destroy_err, "Failed to destroy surplus vm");
        }
        return Err(e);
    }

    if let Some(stale) = state.take_error() {
        tracing::debug!(error = %stale, "Discarding pre-flight error");
    }
    Ok(())
}

/// Grow the primary disk of `vm` when a positive size is configured.
async fn resize_if_requested(
    cancel: &CancellationToken,
    state: &StateBag,
    vm: &VmHandle,
    size_mb: Option<i64>,
) -> VmbuildResult<()> {
    let Some(size_mb) = size_mb.filter(|size| *size > 0) else {
        return Ok(());
    };

    state
        .ui()
        .say(&format!("Resizing primary disk to {} MiB...", size_mb));
    cancellable(cancel, state.driver().resize_disk(cancel, vm, size_mb))
        .await
        .map_err(|e| wrap(e, VmbuildError::resize_failed))
}

/// Destroy the VM owned by the run, if the run is being rolled back.
///
/// Never fails: destroy errors are reported and the handle is kept so the
/// caller can see what was left behind.
async fn destroy_owned_vm(state: &mut StateBag, step: &str) {
    if !state.should_rollback() {
        return;
    }
    let Some(vm) = state.vm().cloned() else {
        return;
    };

    let ui = state.ui();
    ui.say("Destroying VM...");
    match state.driver().destroy_vm(&vm).await {
        Ok(()) => {
            state.take_vm();
            tracing::info!(run_id = %state.run_id().short(), step = step, vm = %vm, "Destroyed vm");
        }
        Err(e) => {
            let err = VmbuildError::destroy_failed(vm.name(), e);
            tracing::error!(step = step, vm = %vm, error = %err, "Cleanup failed to destroy vm");
            ui.error(&err.to_string());
        }
    }
}
