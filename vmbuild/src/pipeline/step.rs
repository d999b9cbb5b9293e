//! Step trait for pipeline execution.

use crate::state::StateBag;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Outcome of [`Step::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Proceed to the next step.
    Continue,
    /// Stop the pipeline and roll back. The step records why in the state.
    Halt,
}

/// A unit of pipeline work.
///
/// `run` is handed the run's cancellation token; a step blocked on a remote
/// call must watch it and return [`StepAction::Halt`] once it fires. The
/// runner only checks for cancellation between steps.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, cancel: &CancellationToken, state: &mut StateBag) -> StepAction;

    /// Undo what `run` produced. Must never fail; problems are reported
    /// through the UI and logs only.
    async fn cleanup(&self, state: &mut StateBag);

    /// Human-readable step name for logging and metrics.
    fn name(&self) -> &str;
}

pub type BoxedStep = Box<dyn Step>;
