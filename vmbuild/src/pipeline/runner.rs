//! Sequential step runner.
//!
//! Runs steps strictly in declared order against one [`StateBag`] and rolls
//! back on halt or cancellation.

use super::metrics::{RunReport, RunState, StepMetrics, StepStatus};
use super::step::{BoxedStep, StepAction};
use crate::state::StateBag;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct StepRunner {
    steps: Vec<BoxedStep>,
    timeout: Option<Duration>,
}

impl StepRunner {
    pub fn new(steps: Vec<BoxedStep>) -> Self {
        Self {
            steps,
            timeout: None,
        }
    }

    /// Cancel the whole run once `timeout` has elapsed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Execute the pipeline.
    ///
    /// Never fails by itself: the outcome is in the returned report and the
    /// halting error, if any, is left in `state`.
    pub async fn run(&self, cancel: CancellationToken, state: &mut StateBag) -> RunReport {
        let started_at = Utc::now();
        let total_start = Instant::now();
        let run_id = state.run_id();

        let watchdog = self
            .timeout
            .map(|timeout| spawn_watchdog(cancel.clone(), timeout));

        let mut steps: Vec<StepMetrics> = self
            .steps
            .iter()
            .map(|step| StepMetrics {
                name: step.name().to_string(),
                status: StepStatus::Pending,
                duration_ms: None,
                cleaned_up: false,
            })
            .collect();
        let mut run_state = RunState::Running;

        for (index, step) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    run_id = %run_id,
                    step = step.name(),
                    "Run cancelled, not starting step"
                );
                state.mark_cancelled();
                run_state = RunState::Cancelled;
                break;
            }

            tracing::debug!(run_id = %run_id, step = step.name(), "Running step");
            let step_start = Instant::now();
            let action = step.run(&cancel, state).await;

            let metrics = &mut steps[index];
            metrics.duration_ms = Some(step_start.elapsed().as_millis());

            match action {
                StepAction::Continue => {
                    metrics.status = StepStatus::RanOk;
                }
                StepAction::Halt => {
                    metrics.status = StepStatus::RanFailed;
                    state.mark_halted();
                    run_state = if cancel.is_cancelled() {
                        state.mark_cancelled();
                        RunState::Cancelled
                    } else {
                        RunState::Halted
                    };
                    tracing::warn!(
                        run_id = %run_id,
                        step = step.name(),
                        error = %state.error().map(|e| e.to_string()).unwrap_or_default(),
                        "Step halted the run"
                    );
                    break;
                }
            }
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        if run_state == RunState::Running {
            run_state = RunState::Completed;
        } else {
            self.rollback(state, &mut steps).await;
        }

        let total_duration_ms = total_start.elapsed().as_millis();
        tracing::info!(
            run_id = %run_id,
            state = ?run_state,
            duration_ms = total_duration_ms as u64,
            "Run finished"
        );

        RunReport {
            state: run_state,
            started_at,
            total_duration_ms,
            steps,
        }
    }

    /// Clean up every step that started, newest first.
    ///
    /// Each cleanup is isolated: a panicking cleanup is logged and the
    /// remaining cleanups still run.
    async fn rollback(&self, state: &mut StateBag, steps: &mut [StepMetrics]) {
        let run_id = state.run_id();

        for (index, step) in self.steps.iter().enumerate().rev() {
            if steps[index].status == StepStatus::Pending {
                continue;
            }

            tracing::debug!(run_id = %run_id, step = step.name(), "Cleaning up step");
            let outcome = AssertUnwindSafe(step.cleanup(state)).catch_unwind().await;
            if outcome.is_err() {
                tracing::error!(
                    run_id = %run_id,
                    step = step.name(),
                    "Step cleanup panicked, continuing rollback"
                );
            }
            steps[index].cleaned_up = true;
        }
    }
}

fn spawn_watchdog(cancel: CancellationToken, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let expired = tokio::select! {
            _ = tokio::time::sleep(timeout) => true,
            _ = cancel.cancelled() => false,
        };
        if expired {
            tracing::warn!(timeout_secs = timeout.as_secs(), "Run deadline reached, cancelling");
            cancel.cancel();
        }
    })
}
