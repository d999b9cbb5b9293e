use chrono::{DateTime, Utc};

/// Global state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Halted,
    Cancelled,
    Completed,
}

/// Per-step state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    RanOk,
    RanFailed,
}

#[derive(Debug, Clone)]
pub struct StepMetrics {
    pub name: String,
    pub status: StepStatus,
    /// Time spent in `run`; `None` if the step never started.
    pub duration_ms: Option<u128>,
    pub cleaned_up: bool,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub total_duration_ms: u128,
    pub steps: Vec<StepMetrics>,
}

impl RunReport {
    pub fn step(&self, name: &str) -> Option<&StepMetrics> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }
}
