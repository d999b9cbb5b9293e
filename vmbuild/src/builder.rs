//! Build orchestration.
//!
//! ```text
//! create build:             clone build:
//!   1. create_vm              1. clone_vm
//! ```
//!
//! Each plan is a list of steps handed to [`StepRunner`]; the run's rollback
//! removes a half-built VM on failure, cancellation or timeout.

use crate::config::BuildConfig;
use crate::driver::{SharedDriver, VmHandle};
use crate::pipeline::{BoxedStep, RunReport, RunState, StepRunner};
use crate::state::StateBag;
use crate::steps::{StepCloneVm, StepCreateVm};
use crate::ui::SharedUi;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;
use vmbuild_shared::{VmbuildError, VmbuildResult};

/// Result of a completed build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub vm: VmHandle,
    /// HTTP address advertised to the guest, for create builds.
    pub http_ip: Option<IpAddr>,
    pub report: RunReport,
}

/// Validates a [`BuildConfig`] and runs the matching step plan.
///
/// # Example
///
/// ```ignore
/// let output = VmBuilder::new(config, ui, driver)?
///     .build(CancellationToken::new())
///     .await?;
/// ```
pub struct VmBuilder {
    config: BuildConfig,
    ui: SharedUi,
    driver: SharedDriver,
    http_ip: Option<IpAddr>,
}

impl VmBuilder {
    /// Validate `config` and, for create builds, resolve the HTTP address.
    /// Every validation failure is reported at once.
    pub fn new(mut config: BuildConfig, ui: SharedUi, driver: SharedDriver) -> VmbuildResult<Self> {
        let errs = config.prepare();
        if !errs.is_empty() {
            return Err(VmbuildError::Validation(errs));
        }

        let http_ip = resolve_http_ip(&config);
        Ok(Self {
            config,
            ui,
            driver,
            http_ip,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Address handed to the create step, resolved once by [`VmBuilder::new`].
    pub fn http_ip(&self) -> Option<IpAddr> {
        self.http_ip
    }

    /// Step names of the plan this builder would run.
    pub fn plan(&self) -> Vec<String> {
        self.execution_plan()
            .iter()
            .map(|step| step.name().to_string())
            .collect()
    }

    fn execution_plan(&self) -> Vec<BoxedStep> {
        let BuildConfig {
            location,
            create,
            clone,
            force,
            ..
        } = &self.config;

        match (create, clone) {
            (Some(create), _) => {
                let mut step = StepCreateVm::new(create.clone(), location.clone(), *force);
                if let Some(ip) = self.http_ip {
                    step = step.with_http_ip(ip);
                }
                vec![Box::new(step)]
            }
            (None, Some(clone)) => vec![Box::new(StepCloneVm::new(
                clone.clone(),
                location.clone(),
                *force,
            ))],
            // Rejected by prepare().
            (None, None) => Vec::new(),
        }
    }

    /// Run the plan to completion.
    ///
    /// On failure the halting step's error is returned; errors raised while
    /// rolling back are only reported through the UI and logs.
    pub async fn build(self, cancel: CancellationToken) -> VmbuildResult<BuildOutput> {
        let mut runner = StepRunner::new(self.execution_plan());
        if let Some(timeout) = self.config.timeout() {
            runner = runner.with_timeout(timeout);
        }

        let mut state = StateBag::new(self.ui.clone(), self.driver.clone());
        tracing::info!(
            run_id = %state.run_id(),
            vm_name = %self.config.location.vm_name,
            steps = ?runner.step_names(),
            "Starting build"
        );

        let report = runner.run(cancel, &mut state).await;

        match report.state {
            RunState::Completed => {
                let vm = state.take_vm().ok_or_else(|| {
                    VmbuildError::Internal("build completed without a vm".into())
                })?;
                Ok(BuildOutput {
                    vm,
                    http_ip: state.http_ip(),
                    report,
                })
            }
            RunState::Cancelled => Err(state.take_error().unwrap_or(VmbuildError::Cancelled)),
            RunState::Halted | RunState::Running => Err(state
                .take_error()
                .unwrap_or_else(|| VmbuildError::Internal("run halted without an error".into()))),
        }
    }
}

/// HTTP address for create builds. Failing to find one is not fatal: the
/// guest simply gets no boot server address.
fn resolve_http_ip(config: &BuildConfig) -> Option<IpAddr> {
    let create = config.create.as_ref()?;
    match create.resolve_http_ip() {
        Ok(ip) => Some(ip),
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine http address");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CloneConfig, CreateConfig, LocationConfig};
    use crate::driver::memory::{InMemoryDriver, Operation};
    use crate::ui::RecordingUi;
    use std::sync::Arc;
    use std::time::Duration;
    use vmbuild_shared::ConfigError;

    fn location() -> LocationConfig {
        LocationConfig {
            vm_name: "builder-vm".into(),
            cluster: "lab".into(),
            ..Default::default()
        }
    }

    fn create_config() -> BuildConfig {
        BuildConfig {
            location: location(),
            create: Some(CreateConfig {
                disk_size: 8192,
                http_ip: "127.0.0.1".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn clone_config() -> BuildConfig {
        BuildConfig {
            location: location(),
            clone: Some(CloneConfig {
                template: "base".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn builder(config: BuildConfig, driver: Arc<InMemoryDriver>) -> VmbuildResult<VmBuilder> {
        VmBuilder::new(config, Arc::new(RecordingUi::new()), driver)
    }

    #[test]
    fn test_validation_reports_everything() {
        let config = BuildConfig {
            clone: Some(CloneConfig {
                linked_clone: true,
                disk_size: 10,
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = builder(config, Arc::new(InMemoryDriver::new()))
            .err()
            .unwrap();

        let errs = err.config_errors();
        assert!(errs.contains(&ConfigError::MissingVmName));
        assert!(errs.contains(&ConfigError::MissingHostOrCluster));
        assert!(errs.contains(&ConfigError::MissingTemplate));
        assert!(errs.contains(&ConfigError::LinkedCloneWithDiskSize));
    }

    #[test]
    fn test_plan_matches_source() {
        let driver = Arc::new(InMemoryDriver::new());
        assert_eq!(
            builder(create_config(), driver.clone()).unwrap().plan(),
            vec!["create_vm"]
        );
        assert_eq!(
            builder(clone_config(), driver).unwrap().plan(),
            vec!["clone_vm"]
        );
    }

    #[tokio::test]
    async fn test_create_build() {
        let driver = Arc::new(InMemoryDriver::new());
        let output = builder(create_config(), driver.clone())
            .unwrap()
            .build(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.vm.name(), "builder-vm");
        assert_eq!(output.http_ip, Some("127.0.0.1".parse().unwrap()));
        assert!(output.report.is_completed());
        assert_eq!(driver.vm("builder-vm").unwrap().disk_size_mb, Some(8192));
    }

    #[tokio::test]
    async fn test_clone_build_failure_returns_halting_error() {
        let driver = Arc::new(InMemoryDriver::new());
        let err = builder(clone_config(), driver.clone())
            .unwrap()
            .build(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, VmbuildError::TemplateNotFound(name) if name == "base"));
        assert!(driver.inventory().is_empty());
    }

    #[tokio::test]
    async fn test_resize_failure_rolls_back() {
        let driver = Arc::new(InMemoryDriver::new());
        driver.fail_on(Operation::Resize, "bad size");

        let err = builder(create_config(), driver.clone())
            .unwrap()
            .build(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, VmbuildError::ResizeFailed(_)));
        assert!(!driver.contains("builder-vm"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_and_rolls_back() {
        let driver = Arc::new(InMemoryDriver::new());
        driver.set_latency(Duration::from_secs(20));
        let mut config = create_config();
        config.timeout_secs = Some(50);

        let err = builder(config, driver.clone())
            .unwrap()
            .build(CancellationToken::new())
            .await
            .unwrap_err();

        // find (20s) + create (20s) complete, resize is cut off at 50s.
        assert!(matches!(err, VmbuildError::Cancelled));
        assert!(!driver.contains("builder-vm"));
    }

    #[test]
    fn test_http_ip_resolved_once_at_construction() {
        let driver = Arc::new(InMemoryDriver::new());
        let create = builder(create_config(), driver.clone()).unwrap();
        assert_eq!(create.http_ip(), Some("127.0.0.1".parse().unwrap()));

        let clone = builder(clone_config(), driver.clone()).unwrap();
        assert_eq!(clone.http_ip(), None);

        // Planning only reads the builder.
        assert_eq!(create.plan(), create.plan());
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_http_ip_is_not_fatal() {
        let mut config = create_config();
        if let Some(create) = config.create.as_mut() {
            create.http_ip = "no-such-interface0".into();
        }
        let driver = Arc::new(InMemoryDriver::new());

        let output = builder(config, driver)
            .unwrap()
            .build(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.http_ip, None);
    }
}
