//! Sequential step pipeline with rollback.
//!
//! ## Architecture
//!
//! ```text
//! StepRunner → Steps (in order) → StateBag
//!
//! - Step:       unit of work with run (forward) and cleanup (rollback)
//! - StepRunner: runs steps in order, stops at the first Halt or at a
//!               cancellation observed between steps, then rolls back
//! ```
//!
//! ## Rollback
//!
//! When the run ends halted or cancelled, `cleanup` is called on the step
//! that halted and on every step that ran successfully, newest first. Steps
//! that never started are not touched. A completed run triggers no cleanup,
//! so whatever the steps produced is handed to the caller.
//!
//! ## Example
//!
//! ```ignore
//! let runner = StepRunner::new(vec![Box::new(StepCloneVm::new(config, location, false))])
//!     .with_timeout(Duration::from_secs(1800));
//! let mut state = StateBag::new(ui, driver);
//! let report = runner.run(CancellationToken::new(), &mut state).await;
//! println!("run {:?} took {}ms", report.state, report.total_duration_ms);
//! ```

mod metrics;
mod runner;
mod step;

pub use metrics::{RunReport, RunState, StepMetrics, StepStatus};
pub use runner::StepRunner;
pub use step::{BoxedStep, Step, StepAction};
