//! vmbuild: step-driven VM provisioning with rollback.
//!
//! A build is a short list of [`pipeline::Step`]s run in order against a
//! shared [`state::StateBag`]. The VM-producing steps ([`steps::StepCreateVm`]
//! and [`steps::StepCloneVm`]) talk to the virtualization platform through the
//! [`driver::Driver`] trait and, when the run halts, is cancelled or times
//! out, destroy whatever they created.
//!
//! [`builder::VmBuilder`] ties the pieces together from a
//! [`config::BuildConfig`].

pub mod builder;
pub mod config;
pub mod driver;
pub mod logging;
pub mod net;
pub mod pipeline;
pub mod state;
pub mod steps;
pub mod ui;

pub use builder::{BuildOutput, VmBuilder};
pub use config::BuildConfig;
pub use driver::{Driver, SharedDriver, VmHandle};
pub use state::{RunId, StateBag};
pub use ui::{SharedUi, Ui};
pub use vmbuild_shared::{ConfigError, VmbuildError, VmbuildResult};
