//! Mock driver for testing and development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{DriverError, Result};
use crate::traits::Driver;
use crate::types::*;

/// Mock driver backed by an in-memory VM table.
///
/// Besides simulating the lifecycle it lets tests script failures:
/// - one-shot faults per operation ([`MockDriver::fail_next`])
/// - losing the connection ([`MockDriver::set_reachable`])
/// - VMs disappearing out of band ([`MockDriver::remove_vm`])
/// - slow calls ([`MockDriver::set_latency`])
///
/// It also records every call and the peak number of concurrent calls.
pub struct MockDriver {
    name: String,
    vms: RwLock<HashMap<String, MockVm>>,
    retained_disks: Mutex<Vec<String>>,
    faults: Mutex<HashMap<DriverOp, VecDeque<DriverError>>>,
    reachable: AtomicBool,
    latency: Mutex<Duration>,
    journal: Mutex<Vec<MockCall>>,
    busy_targets: Mutex<HashSet<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    overlap: AtomicBool,
}

struct MockVm {
    spec: VmSpec,
    state: PowerState,
}

/// Snapshot of a mock VM, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockVmInfo {
    pub vm_id: String,
    pub spec: VmSpec,
    pub state: PowerState,
}

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub op: DriverOp,
    /// VM id, or the VM name for `create`
    pub target: String,
}

/// Tracks a call while it is in flight.
struct InFlight<'a> {
    driver: &'a MockDriver,
    target: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.driver.active.fetch_sub(1, Ordering::SeqCst);
        lock(&self.driver.busy_targets).remove(&self.target);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockDriver {
    /// Create a new mock driver serving hypervisor instance `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        info!(hypervisor = %name, "Creating mock driver");
        Self {
            name,
            vms: RwLock::new(HashMap::new()),
            retained_disks: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            journal: Mutex::new(Vec::new()),
            busy_targets: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            overlap: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Make the next call of `op` fail with `error`. Faults queue up per op.
    pub fn fail_next(&self, op: DriverOp, error: DriverError) {
        lock(&self.faults).entry(op).or_default().push_back(error);
    }

    /// Simulate losing (or regaining) the connection to the hypervisor.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Delete a VM behind the engine's back. Returns whether it existed.
    pub fn remove_vm(&self, vm_id: &str) -> bool {
        self.vms_write().remove(vm_id).is_some()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Look up a VM.
    pub fn vm(&self, vm_id: &str) -> Option<MockVmInfo> {
        self.vms_read().get(vm_id).map(|vm| MockVmInfo {
            vm_id: vm_id.to_string(),
            spec: vm.spec.clone(),
            state: vm.state,
        })
    }

    /// Number of VMs currently defined.
    pub fn vm_count(&self) -> usize {
        self.vms_read().len()
    }

    /// Names of destroyed VMs whose disks were kept.
    pub fn retained_disks(&self) -> Vec<String> {
        lock(&self.retained_disks).clone()
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.journal).clone()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Whether two calls for the same target ever overlapped.
    pub fn overlap_detected(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn vms_read(&self) -> RwLockReadGuard<'_, HashMap<String, MockVm>> {
        self.vms.read().unwrap_or_else(|e| e.into_inner())
    }

    fn vms_write(&self) -> RwLockWriteGuard<'_, HashMap<String, MockVm>> {
        self.vms.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Bookkeeping shared by every call: journal, concurrency tracking,
    /// latency, reachability and scripted faults.
    async fn enter(&self, op: DriverOp, target: &str) -> Result<InFlight<'_>> {
        lock(&self.journal).push(MockCall { op, target: target.to_string() });

        if !lock(&self.busy_targets).insert(target.to_string()) {
            warn!(op = %op, target = %target, "Overlapping calls for the same target");
            self.overlap.store(true, Ordering::SeqCst);
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight { driver: self, target: target.to_string() };

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(DriverError::Unreachable(format!("{} is not answering", self.name)));
        }

        if let Some(fault) = lock(&self.faults).get_mut(&op).and_then(|q| q.pop_front()) {
            debug!(op = %op, error = %fault, "Injected fault");
            return Err(fault);
        }

        Ok(guard)
    }

    fn transition(
        &self,
        vm_id: &str,
        allowed: &[PowerState],
        to: PowerState,
    ) -> Result<PowerState> {
        let mut vms = self.vms_write();
        let vm = vms.get_mut(vm_id)
            .ok_or_else(|| DriverError::ResourceMissing(vm_id.to_string()))?;

        if vm.state == to {
            return Ok(to);
        }
        if !allowed.contains(&vm.state) {
            return Err(DriverError::RejectedByHypervisor(
                format!("VM {} is {}, cannot become {}", vm_id, vm.state, to)
            ));
        }

        vm.state = to;
        Ok(to)
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Mock
    }

    #[instrument(skip(self, spec), fields(hypervisor = %self.name, vm_name = %spec.name))]
    async fn create(&self, spec: &VmSpec) -> Result<VmStatus> {
        let _call = self.enter(DriverOp::Create, &spec.name).await?;

        if spec.name.trim().is_empty() {
            return Err(DriverError::RejectedByHypervisor("Missing or invalid VM name".to_string()));
        }

        let mut vms = self.vms_write();
        if vms.values().any(|vm| vm.spec.name == spec.name) {
            return Err(DriverError::RejectedByHypervisor(
                format!("VM with name {} already exists", spec.name)
            ));
        }

        let vm_id = uuid::Uuid::new_v4().to_string();
        vms.insert(vm_id.clone(), MockVm {
            spec: spec.clone(),
            state: PowerState::Stopped,
        });

        info!(vm_id = %vm_id, "Mock VM created");
        Ok(VmStatus {
            vm_id,
            name: spec.name.clone(),
            state: PowerState::Stopped,
        })
    }

    #[instrument(skip(self), fields(hypervisor = %self.name))]
    async fn start(&self, vm_id: &str) -> Result<PowerState> {
        let _call = self.enter(DriverOp::Start, vm_id).await?;
        let state = self.transition(vm_id, &[PowerState::Stopped], PowerState::Running)?;
        info!("Mock VM started");
        Ok(state)
    }

    #[instrument(skip(self), fields(hypervisor = %self.name, timeout_secs = timeout.as_secs()))]
    async fn stop(&self, vm_id: &str, timeout: Duration) -> Result<PowerState> {
        let _call = self.enter(DriverOp::Stop, vm_id).await?;
        let state = self.transition(
            vm_id,
            &[PowerState::Running, PowerState::Paused],
            PowerState::Stopped,
        )?;
        info!("Mock VM stopped");
        Ok(state)
    }

    #[instrument(skip(self), fields(hypervisor = %self.name))]
    async fn suspend(&self, vm_id: &str) -> Result<PowerState> {
        let _call = self.enter(DriverOp::Suspend, vm_id).await?;
        let state = self.transition(vm_id, &[PowerState::Running], PowerState::Paused)?;
        info!("Mock VM suspended");
        Ok(state)
    }

    #[instrument(skip(self), fields(hypervisor = %self.name))]
    async fn resume(&self, vm_id: &str) -> Result<PowerState> {
        let _call = self.enter(DriverOp::Resume, vm_id).await?;
        let state = self.transition(vm_id, &[PowerState::Paused], PowerState::Running)?;
        info!("Mock VM resumed");
        Ok(state)
    }

    #[instrument(skip(self), fields(hypervisor = %self.name, disks = ?disks))]
    async fn destroy(&self, vm_id: &str, disks: DiskPolicy) -> Result<()> {
        let _call = self.enter(DriverOp::Destroy, vm_id).await?;

        let mut vms = self.vms_write();
        let vm = vms.get(vm_id)
            .ok_or_else(|| DriverError::ResourceMissing(vm_id.to_string()))?;

        if vm.state != PowerState::Stopped {
            return Err(DriverError::RejectedByHypervisor(
                "VM must be stopped before deletion".to_string()
            ));
        }

        if let Some(vm) = vms.remove(vm_id) {
            if disks == DiskPolicy::Retain {
                lock(&self.retained_disks).push(vm.spec.name);
            }
        }

        info!("Mock VM destroyed");
        Ok(())
    }

    #[instrument(skip(self, delta), fields(hypervisor = %self.name))]
    async fn reconfigure(&self, vm_id: &str, delta: &ReconfigureDelta) -> Result<PowerState> {
        let _call = self.enter(DriverOp::Reconfigure, vm_id).await?;

        let mut vms = self.vms_write();
        let vm = vms.get_mut(vm_id)
            .ok_or_else(|| DriverError::ResourceMissing(vm_id.to_string()))?;

        if let Some(cpu) = delta.cpu {
            vm.spec.cpu = cpu;
        }
        if let Some(memory_mib) = delta.memory_mib {
            vm.spec.memory_mib = memory_mib;
        }
        if let Some(nics) = &delta.nics {
            vm.spec.nics = nics.clone();
        }
        if let Some(media) = &delta.media {
            vm.spec.media = media.clone();
        }

        info!("Mock VM reconfigured");
        Ok(vm.state)
    }

    async fn query_status(&self, vm_id: &str) -> Result<VmStatus> {
        let _call = self.enter(DriverOp::QueryStatus, vm_id).await?;

        let vms = self.vms_read();
        let vm = vms.get(vm_id)
            .ok_or_else(|| DriverError::ResourceMissing(vm_id.to_string()))?;

        Ok(VmStatus {
            vm_id: vm_id.to_string(),
            name: vm.spec.name.clone(),
            state: vm.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> VmSpec {
        VmSpec::new(name, "proto_docker").with_memory(2048)
    }

    #[tokio::test]
    async fn test_vm_lifecycle() {
        let driver = MockDriver::new("mock_1");

        // Create
        let status = driver.create(&spec("lifecycle-test")).await.unwrap();
        assert_eq!(status.state, PowerState::Stopped);
        let vm_id = status.vm_id;

        // Start
        assert_eq!(driver.start(&vm_id).await.unwrap(), PowerState::Running);

        // Suspend / resume
        assert_eq!(driver.suspend(&vm_id).await.unwrap(), PowerState::Paused);
        assert_eq!(driver.resume(&vm_id).await.unwrap(), PowerState::Running);

        // Destroy must wait for stop
        let err = driver.destroy(&vm_id, DiskPolicy::Release).await.unwrap_err();
        assert!(matches!(err, DriverError::RejectedByHypervisor(_)));

        driver.stop(&vm_id, Duration::from_secs(5)).await.unwrap();
        driver.destroy(&vm_id, DiskPolicy::Release).await.unwrap();
        assert_eq!(driver.vm_count(), 0);
        assert!(driver.retained_disks().is_empty());

        let err = driver.query_status(&vm_id).await.unwrap_err();
        assert!(matches!(err, DriverError::ResourceMissing(_)));
    }

    #[tokio::test]
    async fn test_duplicate_and_empty_names_rejected() {
        let driver = MockDriver::new("mock_1");
        driver.create(&spec("dup")).await.unwrap();

        let err = driver.create(&spec("dup")).await.unwrap_err();
        assert!(matches!(err, DriverError::RejectedByHypervisor(_)));

        let err = driver.create(&spec("  ")).await.unwrap_err();
        assert!(matches!(err, DriverError::RejectedByHypervisor(_)));
        assert_eq!(driver.vm_count(), 1);
    }

    #[tokio::test]
    async fn test_retained_disks() {
        let driver = MockDriver::new("mock_1");
        let vm_id = driver.create(&spec("keeper")).await.unwrap().vm_id;

        driver.destroy(&vm_id, DiskPolicy::Retain).await.unwrap();
        assert_eq!(driver.retained_disks(), vec!["keeper".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_faults_are_one_shot() {
        let driver = MockDriver::new("mock_1");
        let vm_id = driver.create(&spec("flaky")).await.unwrap().vm_id;

        driver.fail_next(DriverOp::Start, DriverError::Transient("busy".into()));
        let err = driver.start(&vm_id).await.unwrap_err();
        assert!(err.is_retryable());

        assert_eq!(driver.start(&vm_id).await.unwrap(), PowerState::Running);
    }

    #[tokio::test]
    async fn test_unreachable_and_missing() {
        let driver = MockDriver::new("mock_1");
        let vm_id = driver.create(&spec("gone")).await.unwrap().vm_id;

        driver.set_reachable(false);
        let err = driver.query_status(&vm_id).await.unwrap_err();
        assert!(matches!(err, DriverError::Unreachable(_)));

        driver.set_reachable(true);
        assert!(driver.remove_vm(&vm_id));
        let err = driver.start(&vm_id).await.unwrap_err();
        assert!(matches!(err, DriverError::ResourceMissing(_)));
    }

    #[tokio::test]
    async fn test_reconfigure_applies_delta() {
        let driver = MockDriver::new("mock_1");
        let vm_id = driver.create(&spec("resize")).await.unwrap().vm_id;

        let delta = ReconfigureDelta {
            memory_mib: Some(8192),
            ..Default::default()
        };
        driver.reconfigure(&vm_id, &delta).await.unwrap();

        let vm = driver.vm(&vm_id).unwrap();
        assert_eq!(vm.spec.memory_mib, 8192);
        assert_eq!(vm.spec.cpu, 1);
    }

    #[tokio::test]
    async fn test_call_journal_and_concurrency() {
        let driver = std::sync::Arc::new(MockDriver::new("mock_1"));
        driver.set_latency(Duration::from_millis(50));

        let a = driver.clone();
        let b = driver.clone();
        let (ra, rb) = tokio::join!(
            async move { a.create(&spec("a")).await },
            async move { b.create(&spec("b")).await },
        );
        ra.unwrap();
        rb.unwrap();

        assert_eq!(driver.calls().len(), 2);
        assert_eq!(driver.peak_concurrency(), 2);
        assert!(!driver.overlap_detected());
    }
}
