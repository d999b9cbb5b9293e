//! In-process driver keeping its inventory in memory.
//!
//! Used by tests and by `vmbuild simulate` to exercise a full pipeline
//! without a platform. Failures can be injected per operation and every
//! call is journaled in order.
//!
//! Create and clone behave like platform tasks: the VM is registered as
//! soon as the task is submitted and the configured latency is spent
//! afterwards. A cancelled token aborts the task and removes the VM; a call
//! that is simply dropped leaves the VM behind.

use super::{CloneSpec, CreateSpec, Driver, VmHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vmbuild_shared::{VmbuildError, VmbuildResult};

/// Driver operation, used to target failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Find,
    Create,
    Clone,
    Resize,
    Destroy,
}

/// One journaled driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Find(String),
    Create(String),
    Clone { template: String, name: String },
    Resize { name: String, size_mb: i64 },
    Destroy(String),
}

/// Inventory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRecord {
    pub handle: VmHandle,
    pub is_template: bool,
    pub disk_size_mb: Option<i64>,
    pub annotation: String,
    pub networks: Vec<String>,
    pub linked_to: Option<String>,
}

#[derive(Debug, Default)]
struct Inventory {
    vms: BTreeMap<String, VmRecord>,
    calls: Vec<DriverCall>,
    failures: HashMap<Operation, String>,
    empty_clone: bool,
    destroy_then_fail: Option<String>,
    latency: Option<Duration>,
    next_id: u64,
}

impl Inventory {
    fn insert(&mut self, name: &str, is_template: bool) -> VmHandle {
        self.next_id += 1;
        let handle = VmHandle::new(format!("vm-{}", self.next_id), name);
        self.vms.insert(
            name.to_string(),
            VmRecord {
                handle: handle.clone(),
                is_template,
                disk_size_mb: None,
                annotation: String::new(),
                networks: Vec::new(),
                linked_to: None,
            },
        );
        handle
    }

    fn check(&self, op: Operation) -> VmbuildResult<()> {
        match self.failures.get(&op) {
            Some(message) => Err(VmbuildError::Driver(message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDriver {
    inner: Mutex<Inventory>,
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing VM.
    pub fn with_vm(self, name: &str) -> Self {
        self.inner.lock().insert(name, false);
        self
    }

    /// Seed a template that can be cloned.
    pub fn with_template(self, name: &str) -> Self {
        self.inner.lock().insert(name, true);
        self
    }

    /// Make every subsequent `op` call fail with `message`.
    pub fn fail_on(&self, op: Operation, message: &str) {
        self.inner.lock().failures.insert(op, message.to_string());
    }

    /// Make destroys remove the VM and still report `message`, like a
    /// platform task that times out after completing.
    pub fn fail_after_destroy(&self, message: &str) {
        self.inner.lock().destroy_then_fail = Some(message.to_string());
    }

    /// Make clones succeed without returning a VM.
    pub fn return_empty_clones(&self) {
        self.inner.lock().empty_clone = true;
    }

    /// Delay every call, simulating a slow platform.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = Some(latency);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.inner.lock().calls.clone()
    }

    pub fn destroy_calls(&self) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, DriverCall::Destroy(_)))
            .count()
    }

    pub fn vm(&self, name: &str) -> Option<VmRecord> {
        self.inner.lock().vms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().vms.contains_key(name)
    }

    /// Names of every VM and template, sorted.
    pub fn inventory(&self) -> Vec<String> {
        self.inner.lock().vms.keys().cloned().collect()
    }

    fn journal(&self, call: DriverCall) {
        self.inner.lock().calls.push(call);
    }

    /// Spend the configured latency, giving up early once `cancel` fires.
    async fn settle(&self, cancel: Option<&CancellationToken>) -> VmbuildResult<()> {
        let Some(latency) = self.inner.lock().latency else {
            return Ok(());
        };
        match cancel {
            Some(cancel) => tokio::select! {
                _ = tokio::time::sleep(latency) => Ok(()),
                _ = cancel.cancelled() => Err(VmbuildError::Cancelled),
            },
            None => {
                tokio::time::sleep(latency).await;
                Ok(())
            }
        }
    }

    async fn enter(&self, call: DriverCall, op: Operation) -> VmbuildResult<()> {
        self.journal(call);
        self.settle(None).await?;
        self.inner.lock().check(op)
    }

    /// Wait for a submitted create/clone task, aborting it on cancellation.
    async fn finish_task(&self, cancel: &CancellationToken, name: &str) -> VmbuildResult<()> {
        if let Err(e) = self.settle(Some(cancel)).await {
            self.inner.lock().vms.remove(name);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for InMemoryDriver {
    async fn find_vm(&self, name: &str) -> VmbuildResult<Option<VmHandle>> {
        self.enter(DriverCall::Find(name.to_string()), Operation::Find)
            .await?;
        Ok(self.inner.lock().vms.get(name).map(|r| r.handle.clone()))
    }

    async fn create_vm(
        &self,
        cancel: &CancellationToken,
        spec: &CreateSpec,
    ) -> VmbuildResult<VmHandle> {
        let name = &spec.location.vm_name;
        self.journal(DriverCall::Create(name.clone()));

        let handle = {
            let mut inner = self.inner.lock();
            inner.check(Operation::Create)?;
            if inner.vms.contains_key(name) {
                return Err(VmbuildError::Driver(format!(
                    "a vm named {} already exists",
                    name
                )));
            }
            let handle = inner.insert(name, false);
            if let Some(record) = inner.vms.get_mut(name) {
                record.annotation = spec.annotation.clone();
                record.networks = spec.networks.clone();
                record.disk_size_mb = spec.storage.first().map(|d| d.disk_size);
            }
            handle
        };

        self.finish_task(cancel, name).await?;
        Ok(handle)
    }

    async fn clone_vm(
        &self,
        cancel: &CancellationToken,
        template: &VmHandle,
        spec: &CloneSpec,
    ) -> VmbuildResult<Option<VmHandle>> {
        let name = &spec.location.vm_name;
        self.journal(DriverCall::Clone {
            template: template.name().to_string(),
            name: name.clone(),
        });

        let handle = {
            let mut inner = self.inner.lock();
            inner.check(Operation::Clone)?;
            if !inner.vms.contains_key(template.name()) {
                return Err(VmbuildError::Driver(format!(
                    "template {} vanished",
                    template.name()
                )));
            }
            if inner.vms.contains_key(name) {
                return Err(VmbuildError::Driver(format!(
                    "a vm named {} already exists",
                    name
                )));
            }
            if inner.empty_clone {
                None
            } else {
                let handle = inner.insert(name, false);
                if let Some(record) = inner.vms.get_mut(name) {
                    record.annotation = spec.annotation.clone();
                    record.networks = spec.networks.clone();
                    record.linked_to = spec.linked_clone.then(|| template.name().to_string());
                }
                Some(handle)
            }
        };

        self.finish_task(cancel, name).await?;
        Ok(handle)
    }

    async fn resize_disk(
        &self,
        cancel: &CancellationToken,
        vm: &VmHandle,
        size_mb: i64,
    ) -> VmbuildResult<()> {
        self.journal(DriverCall::Resize {
            name: vm.name().to_string(),
            size_mb,
        });
        self.settle(Some(cancel)).await?;

        let mut inner = self.inner.lock();
        inner.check(Operation::Resize)?;
        let record = inner
            .vms
            .get_mut(vm.name())
            .ok_or_else(|| VmbuildError::NotFound(vm.name().to_string()))?;
        record.disk_size_mb = Some(size_mb);
        Ok(())
    }

    async fn destroy_vm(&self, vm: &VmHandle) -> VmbuildResult<()> {
        self.enter(DriverCall::Destroy(vm.name().to_string()), Operation::Destroy)
            .await?;

        let mut inner = self.inner.lock();
        inner
            .vms
            .remove(vm.name())
            .ok_or_else(|| VmbuildError::NotFound(vm.name().to_string()))?;
        match &inner.destroy_then_fail {
            Some(message) => Err(VmbuildError::Driver(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CreateConfig, LocationConfig};

    fn spec(name: &str) -> CreateSpec {
        let location = LocationConfig {
            vm_name: name.into(),
            host: "esxi-01".into(),
            ..Default::default()
        };
        CreateSpec::new(&location, &CreateConfig::default())
    }

    #[tokio::test]
    async fn test_create_then_find_then_destroy() {
        let driver = InMemoryDriver::new();

        let vm = driver.create_vm(&CancellationToken::new(), &spec("web-01")).await.unwrap();
        assert_eq!(driver.find_vm("web-01").await.unwrap(), Some(vm.clone()));

        driver.destroy_vm(&vm).await.unwrap();
        assert!(driver.find_vm("web-01").await.unwrap().is_none());
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Create("web-01".into()),
                DriverCall::Find("web-01".into()),
                DriverCall::Destroy("web-01".into()),
                DriverCall::Find("web-01".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_conflicts_with_existing() {
        let driver = InMemoryDriver::new().with_vm("web-01");
        let err = driver.create_vm(&CancellationToken::new(), &spec("web-01")).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let driver = InMemoryDriver::new().with_vm("web-01");
        driver.fail_on(Operation::Destroy, "vm is locked");

        let vm = driver.find_vm("web-01").await.unwrap().unwrap();
        let err = driver.destroy_vm(&vm).await.unwrap_err();
        assert_eq!(err.to_string(), "driver error: vm is locked");
        assert!(driver.contains("web-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_create_aborts_task() {
        let driver = InMemoryDriver::new();
        driver.set_latency(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let err = driver.create_vm(&cancel, &spec("web-01")).await.unwrap_err();

        assert!(matches!(err, VmbuildError::Cancelled));
        assert!(!driver.contains("web-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_create_leaves_vm() {
        let driver = InMemoryDriver::new();
        driver.set_latency(Duration::from_secs(30));

        let cancel = CancellationToken::new();
        let spec = spec("web-01");
        let call = driver.create_vm(&cancel, &spec);
        let timed_out = tokio::time::timeout(Duration::from_secs(5), call).await;

        assert!(timed_out.is_err());
        assert!(driver.contains("web-01"));
    }

    #[tokio::test]
    async fn test_destroy_then_fail_removes_vm() {
        let driver = InMemoryDriver::new().with_vm("web-01");
        driver.fail_after_destroy("task timed out");

        let vm = driver.find_vm("web-01").await.unwrap().unwrap();
        assert!(driver.destroy_vm(&vm).await.is_err());
        assert!(!driver.contains("web-01"));
    }

    #[tokio::test]
    async fn test_linked_clone_records_template() {
        let driver = InMemoryDriver::new().with_template("ubuntu");
        let template = driver.find_vm("ubuntu").await.unwrap().unwrap();
        let spec = CloneSpec {
            location: LocationConfig {
                vm_name: "web-01".into(),
                ..Default::default()
            },
            linked_clone: true,
            networks: vec![],
            network_card: String::new(),
            annotation: "clone".into(),
        };

        let vm = driver
            .clone_vm(&CancellationToken::new(), &template, &spec)
            .await
            .unwrap()
            .unwrap();
        let record = driver.vm(vm.name()).unwrap();
        assert_eq!(record.linked_to.as_deref(), Some("ubuntu"));
        assert_eq!(record.annotation, "clone");
        assert_eq!(driver.inventory(), vec!["ubuntu", "web-01"]);
    }
}
