//! Descriptor lifecycle state machine.
//!
//! ```text
//!                 deploy              start               pause
//! Provisioned ───────────▶ Created ─────────▶ Running ◀──────────▶ Paused
//!      ▲                     │  ▲               │        resume
//!      │      undeploy       │  │    stop       ▼
//!      └─────────────────────┴──┴──────────── Stopped
//!
//! any deployed state ── connection lost ──▶ Unreachable ── refresh ──▶ previous
//! any state ── unrecoverable error ──▶ Failed ── recover ──▶ observed
//! ```
//!
//! Every transition is applied by one job holding the descriptor's slot.
//! Driver failures are mapped onto states here:
//! - `Unreachable` (or a timed out call): Unreachable, remembering the source
//! - `ResourceMissing`: back to Provisioned
//! - `RejectedByHypervisor` and exhausted `Transient`: Failed

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use univor_driver::{DiskPolicy, Driver, DriverError, DriverOp, PowerState};

use crate::context::Context;
use crate::descriptor::{
    Descriptor, DescriptorHandle, DescriptorStatus, OperationMetadata, OperationOutcome,
};
use crate::engine::command::{CommandParams, OperationResult};
use crate::error::{Result, UnivorError};
use crate::operation::Operation;
use crate::path::NodePath;

use DescriptorStatus::*;

/// States an operation may start from.
pub fn legal_sources(operation: Operation) -> &'static [DescriptorStatus] {
    match operation {
        Operation::Show | Operation::Edit => &[
            Provisioned, Created, Starting, Running, Paused, Stopping, Stopped, Unreachable, Failed,
        ],
        Operation::Provision => &[],
        Operation::Deprovision | Operation::Deploy => &[Provisioned],
        Operation::Start | Operation::Undeploy | Operation::Reconfigure => &[Created, Stopped],
        Operation::Pause | Operation::Stop => &[Running],
        Operation::Resume => &[Paused],
        Operation::Refresh => &[Created, Running, Paused, Stopped, Unreachable],
        Operation::Recover => &[Failed],
    }
}

/// Fail with a state error unless `operation` may start from `status`.
pub fn check_transition(operation: Operation, status: DescriptorStatus) -> Result<()> {
    if legal_sources(operation).contains(&status) {
        Ok(())
    } else {
        Err(UnivorError::State(format!("Cannot {} while {}", operation, status)))
    }
}

/// Disk policy for an undeploy: the command's choice, else the configured one.
pub fn undeploy_policy(ctx: &Context, params: &CommandParams) -> Result<DiskPolicy> {
    match (params.release_disks, ctx.config.undeploy_disk_policy) {
        (Some(true), _) => Ok(DiskPolicy::Release),
        (Some(false), _) => Ok(DiskPolicy::Retain),
        (None, Some(policy)) => Ok(policy),
        (None, None) => Err(UnivorError::Validation(
            "Undeploy needs release_disks or a configured undeploy_disk_policy".to_string(),
        )),
    }
}

/// Fail with a conflict when another deployed descriptor already holds
/// `vm_name` on `hypervisor`.
pub(crate) fn check_vm_name(ctx: &Context, handle: &DescriptorHandle, hypervisor: &str, vm_name: &str) -> Result<()> {
    for other in ctx.tree.descriptors_under(&NodePath::root())? {
        if other.id() == handle.id() {
            continue;
        }
        let desc = other.snapshot()?;
        if !desc.has_vm_id() || desc.hypervisor.as_deref() != Some(hypervisor) {
            continue;
        }
        let taken = desc
            .deployed_config
            .as_ref()
            .and_then(|c| c.vm_name().map(str::to_string))
            .unwrap_or_else(|| desc.default_vm_name());
        if taken == vm_name {
            return Err(UnivorError::Conflict(format!(
                "VM name {} on {} is already used by {}",
                vm_name, hypervisor, desc.full_name
            )));
        }
    }
    Ok(())
}

/// Run one async operation against one descriptor, then record its outcome
/// on the descriptor and persist it. The caller holds the descriptor's slot.
#[instrument(skip(ctx, handle, params), fields(descriptor = %handle.id()))]
pub async fn execute(
    ctx: &Context,
    handle: &DescriptorHandle,
    command_id: u64,
    operation: Operation,
    params: &CommandParams,
) -> Result<OperationResult> {
    let result = Transition { ctx, handle, params }.run(operation).await;

    handle.update(|d| {
        d.last_operation = Some(OperationMetadata {
            command_id,
            operation,
            outcome: if result.is_ok() {
                OperationOutcome::Succeeded
            } else {
                OperationOutcome::Failed
            },
            at: Utc::now(),
        });
        d.last_error = result.as_ref().err().map(Into::into);
    })?;

    match (persist(ctx, handle).await, result) {
        (Ok(()), result) => result,
        (Err(e), Ok(applied)) => {
            let status = applied.status.map(|s| s.to_string()).unwrap_or_default();
            let vm = applied.vm_id.as_deref().map(|id| format!(" with VM {}", id)).unwrap_or_default();
            error!(command_id, %operation, error = %e, %status, "Operation applied but not persisted");
            let cause = match e {
                UnivorError::Storage(msg) => msg,
                other => other.to_string(),
            };
            Err(UnivorError::Storage(format!(
                "{} was applied but not persisted ({}); descriptor is {}{}",
                operation, cause, status, vm
            )))
        }
        (Err(e), Err(_)) => Err(e),
    }
}

pub(crate) async fn persist(ctx: &Context, handle: &DescriptorHandle) -> Result<()> {
    let snapshot = handle.snapshot()?;
    ctx.storage.save_descriptor(&snapshot).await
}

/// Call a driver with the configured timeout, retrying transient failures.
async fn call_driver<T, F, Fut>(ctx: &Context, op: DriverOp, call: F) -> std::result::Result<T, DriverError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, DriverError>>,
{
    call_driver_within(ctx, op, ctx.config.driver_timeout(), call).await
}

/// Like [`call_driver`], with each attempt bounded by `timeout`.
async fn call_driver_within<T, F, Fut>(
    ctx: &Context,
    op: DriverOp,
    timeout: Duration,
    call: F,
) -> std::result::Result<T, DriverError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, DriverError>>,
{
    let mut attempt = 0;

    loop {
        let outcome = match tokio::time::timeout(timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DriverError::Unreachable(format!(
                "{} did not answer within {}s", op, timeout.as_secs()
            ))),
        };

        match outcome {
            Err(e) if e.is_retryable() && attempt < ctx.config.transient_retries => {
                attempt += 1;
                let backoff = ctx.config.retry_backoff(attempt);
                warn!(op = %op, attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "Retrying driver call");
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

fn power_to_status(state: PowerState) -> DescriptorStatus {
    match state {
        PowerState::Stopped => Stopped,
        PowerState::Running => Running,
        PowerState::Paused => Paused,
    }
}

struct Transition<'a> {
    ctx: &'a Context,
    handle: &'a DescriptorHandle,
    params: &'a CommandParams,
}

impl Transition<'_> {
    async fn run(&self, operation: Operation) -> Result<OperationResult> {
        let desc = self.handle.snapshot()?;
        check_transition(operation, desc.status)?;

        match operation {
            Operation::Deploy => self.deploy(&desc).await,
            Operation::Start => {
                let driver = self.driver_for(&desc)?;
                let vm_id = desc.vm_id()?;
                self.power(&desc, Some(Starting), DriverOp::Start, self.ctx.config.driver_timeout(), || {
                    driver.start(vm_id)
                }).await
            }
            Operation::Stop => {
                let driver = self.driver_for(&desc)?;
                let vm_id = desc.vm_id()?;
                let timeout = self
                    .params
                    .stop_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.ctx.config.stop_timeout());
                // The guest gets its full grace period before the call itself may time out.
                let limit = timeout + self.ctx.config.driver_timeout();
                self.power(&desc, Some(Stopping), DriverOp::Stop, limit, || driver.stop(vm_id, timeout)).await
            }
            Operation::Pause => {
                let driver = self.driver_for(&desc)?;
                let vm_id = desc.vm_id()?;
                self.power(&desc, None, DriverOp::Suspend, self.ctx.config.driver_timeout(), || {
                    driver.suspend(vm_id)
                }).await
            }
            Operation::Resume => {
                let driver = self.driver_for(&desc)?;
                let vm_id = desc.vm_id()?;
                self.power(&desc, None, DriverOp::Resume, self.ctx.config.driver_timeout(), || {
                    driver.resume(vm_id)
                }).await
            }
            Operation::Undeploy => self.undeploy(&desc).await,
            Operation::Reconfigure => self.reconfigure(&desc).await,
            Operation::Refresh => self.refresh(&desc).await,
            Operation::Recover => self.recover(&desc).await,
            Operation::Show | Operation::Edit | Operation::Provision | Operation::Deprovision => {
                Err(UnivorError::Internal(format!("{} is not a queued operation", operation)))
            }
        }
    }

    fn driver_for(&self, desc: &Descriptor) -> Result<std::sync::Arc<dyn Driver>> {
        let name = desc.hypervisor.as_deref().ok_or_else(|| {
            UnivorError::Internal(format!("{} has a VM but no hypervisor", desc.full_name))
        })?;
        self.ctx.drivers.get(name)
    }

    fn result(&self) -> Result<OperationResult> {
        let desc = self.handle.snapshot()?;
        Ok(OperationResult {
            status: Some(desc.status),
            vm_id: desc.vm_id().ok().map(str::to_string),
            detail: None,
            definition: None,
        })
    }

    /// Map a driver failure onto the descriptor and hand the error back.
    fn fail(&self, source: DescriptorStatus, err: DriverError) -> Result<OperationResult> {
        let full_name = self.handle.full_name()?;
        self.handle.update(|d| match &err {
            DriverError::Unreachable(_) => {
                if !d.has_vm_id() {
                    d.status = source;
                } else if source != Unreachable {
                    d.unreachable_from = Some(source);
                    d.status = Unreachable;
                }
            }
            DriverError::ResourceMissing(_) => d.clear_deployment(),
            DriverError::RejectedByHypervisor(_) | DriverError::Transient(_) => d.status = Failed,
        })?;

        let status = self.handle.status()?;
        warn!(path = %full_name, error = %err, status = %status, "Driver call failed");
        Err(err.into())
    }

    async fn deploy(&self, desc: &Descriptor) -> Result<OperationResult> {
        let computed = self.ctx.tree.compute(self.handle)?;
        let hypervisor = computed
            .use_hypervisor()
            .map(str::to_string)
            .ok_or_else(|| UnivorError::Validation("use_hypervisor is missing".to_string()))?;
        let driver = self.ctx.drivers.get(&hypervisor)?;
        let spec = computed.to_vm_spec(&desc.default_vm_name())?;
        check_vm_name(self.ctx, self.handle, &hypervisor, &spec.name)?;

        info!(path = %desc.full_name, hypervisor = %hypervisor, vm_name = %spec.name, "Deploying");
        match call_driver(self.ctx, DriverOp::Create, || driver.create(&spec)).await {
            Ok(status) => {
                self.handle.update(|d| {
                    d.record_deployment(status.vm_id, hypervisor, computed);
                    d.status = Created;
                })?;
                self.result()
            }
            Err(e) => self.fail(desc.status, e),
        }
    }

    /// Shared shape of start, stop, pause and resume: optional transient
    /// marker, one driver call, then the observed power state.
    async fn power<F, Fut>(
        &self,
        desc: &Descriptor,
        marker: Option<DescriptorStatus>,
        op: DriverOp,
        timeout: Duration,
        call: F,
    ) -> Result<OperationResult>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<PowerState, DriverError>>,
    {
        let source = desc.status;
        if let Some(marker) = marker {
            self.handle.update(|d| d.status = marker)?;
        }

        match call_driver_within(self.ctx, op, timeout, call).await {
            Ok(state) => {
                self.handle.update(|d| d.status = power_to_status(state))?;
                debug!(path = %desc.full_name, state = %state, "Power state changed");
                self.result()
            }
            Err(e) => self.fail(source, e),
        }
    }

    async fn undeploy(&self, desc: &Descriptor) -> Result<OperationResult> {
        let policy = undeploy_policy(self.ctx, self.params)?;
        let driver = self.driver_for(desc)?;
        let vm_id = desc.vm_id()?;

        match call_driver(self.ctx, DriverOp::Destroy, || driver.destroy(vm_id, policy)).await {
            Ok(()) | Err(DriverError::ResourceMissing(_)) => {
                self.handle.update(|d| d.clear_deployment())?;
                info!(path = %desc.full_name, disks = ?policy, "Undeployed");
                self.result()
            }
            Err(e) => self.fail(desc.status, e),
        }
    }

    async fn reconfigure(&self, desc: &Descriptor) -> Result<OperationResult> {
        let computed = self.ctx.tree.compute(self.handle)?;
        let deployed = desc.deployed_config.as_ref().ok_or_else(|| {
            UnivorError::Internal(format!("{} has a VM but no deployed config", desc.full_name))
        })?;

        let drifted = computed.creation_drift(deployed);
        if !drifted.is_empty() {
            return Err(UnivorError::Validation(format!(
                "Creation parameters changed since deploy ({}); undeploy and deploy again",
                drifted.join(", ")
            )));
        }

        let delta = computed.execution_delta(deployed, &desc.default_vm_name())?;
        if !delta.is_empty() {
            let driver = self.driver_for(desc)?;
            let vm_id = desc.vm_id()?;
            if let Err(e) = call_driver(self.ctx, DriverOp::Reconfigure, || driver.reconfigure(vm_id, &delta)).await {
                return self.fail(desc.status, e);
            }
        }

        self.handle.update(|d| d.deployed_config = Some(computed))?;
        let mut result = self.result()?;
        if delta.is_empty() {
            result.detail = Some("No VM changes needed".to_string());
        }
        Ok(result)
    }

    async fn refresh(&self, desc: &Descriptor) -> Result<OperationResult> {
        let driver = self.driver_for(desc)?;
        let vm_id = desc.vm_id()?;

        match call_driver(self.ctx, DriverOp::QueryStatus, || driver.query_status(vm_id)).await {
            Ok(observed) => {
                self.handle.update(|d| {
                    d.status = match (d.status, d.unreachable_from.take()) {
                        (Unreachable, Some(previous)) => previous,
                        (Created, _) if observed.state == PowerState::Stopped => Created,
                        _ => power_to_status(observed.state),
                    };
                })?;
                self.result()
            }
            Err(DriverError::ResourceMissing(_)) => self.gone(desc),
            Err(e) => self.fail(desc.status, e),
        }
    }

    async fn recover(&self, desc: &Descriptor) -> Result<OperationResult> {
        if !desc.has_vm_id() {
            self.handle.update(|d| d.clear_deployment())?;
            return self.result();
        }

        let driver = self.driver_for(desc)?;
        let vm_id = desc.vm_id()?;
        match call_driver(self.ctx, DriverOp::QueryStatus, || driver.query_status(vm_id)).await {
            Ok(observed) => {
                self.handle.update(|d| {
                    d.unreachable_from = None;
                    d.status = power_to_status(observed.state);
                })?;
                info!(path = %desc.full_name, state = %observed.state, "Recovered");
                self.result()
            }
            Err(DriverError::ResourceMissing(_)) => self.gone(desc),
            // Stays Failed.
            Err(e) => Err(e.into()),
        }
    }

    /// The VM vanished: revert to a definition-only descriptor.
    fn gone(&self, desc: &Descriptor) -> Result<OperationResult> {
        self.handle.update(|d| d.clear_deployment())?;
        info!(path = %desc.full_name, "VM no longer exists on the hypervisor");
        let mut result = self.result()?;
        result.detail = Some("VM no longer exists; descriptor reverted to Provisioned".to_string());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::definition::Definition;
    use crate::path::NodePath;
    use crate::registry::DriverRegistry;
    use crate::storage::MemoryStorage;
    use crate::tree::DescriptorTree;
    use serde_json::json;
    use std::sync::Arc;
    use univor_driver::MockDriver;

    struct Fixture {
        ctx: Context,
        mock: Arc<MockDriver>,
        storage: Arc<MemoryStorage>,
        handle: Arc<DescriptorHandle>,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let tree = DescriptorTree::new();
        let root_common = json!({"use_hypervisor": "ESXi_1", "use_prototype": "proto_docker"});
        tree.set_common(&NodePath::root(), Definition::from_value(root_common).unwrap()).unwrap();
        let handle = tree
            .create_descriptor(&NodePath::root(), "vm1", Definition::from_value(json!({"memory": 2048})).unwrap())
            .unwrap();

        let mock = Arc::new(MockDriver::new("ESXi_1"));
        let storage = Arc::new(MemoryStorage::new());
        let drivers = DriverRegistry::new().with_driver(mock.clone());
        let ctx = Context::new(tree, storage.clone(), drivers, config);
        Fixture { ctx, mock, storage, handle }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            retry_backoff_ms: 1,
            undeploy_disk_policy: Some(DiskPolicy::Release),
            ..Default::default()
        }
    }

    async fn run(f: &Fixture, op: Operation) -> Result<OperationResult> {
        execute(&f.ctx, &f.handle, 1, op, &CommandParams::default()).await
    }

    #[test]
    fn test_legal_sources() {
        assert!(check_transition(Operation::Deploy, Provisioned).is_ok());
        assert!(check_transition(Operation::Deploy, Created).is_err());
        assert!(check_transition(Operation::Start, Stopped).is_ok());
        assert!(check_transition(Operation::Pause, Stopped).is_err());
        assert!(check_transition(Operation::Recover, Running).is_err());
        assert!(check_transition(Operation::Refresh, Unreachable).is_ok());
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let f = fixture(fast_config());

        let result = run(&f, Operation::Deploy).await.unwrap();
        assert_eq!(result.status, Some(Created));
        let vm_id = result.vm_id.unwrap();
        assert_eq!(f.mock.vm(&vm_id).unwrap().spec.memory_mib, 2048);
        assert_eq!(f.mock.vm(&vm_id).unwrap().spec.name, "vm1");

        for (op, expected) in [
            (Operation::Start, Running),
            (Operation::Pause, Paused),
            (Operation::Resume, Running),
            (Operation::Stop, Stopped),
        ] {
            assert_eq!(run(&f, op).await.unwrap().status, Some(expected));
        }

        let result = run(&f, Operation::Undeploy).await.unwrap();
        assert_eq!(result.status, Some(Provisioned));
        assert!(result.vm_id.is_none());
        assert_eq!(f.mock.vm_count(), 0);

        let saved = f.storage.descriptor(&NodePath::parse("/vm1").unwrap()).unwrap();
        assert_eq!(saved.status, Provisioned);
        assert_eq!(saved.last_operation.unwrap().operation, Operation::Undeploy);
    }

    #[tokio::test]
    async fn test_illegal_source_skips_driver() {
        let f = fixture(fast_config());
        let err = run(&f, Operation::Start).await.unwrap_err();
        assert!(matches!(err, UnivorError::State(_)));
        assert!(f.mock.calls().is_empty());
        assert!(f.handle.snapshot().unwrap().last_error.is_some());
    }

    #[tokio::test]
    async fn test_rejected_goes_failed_and_recover() {
        let f = fixture(fast_config());
        run(&f, Operation::Deploy).await.unwrap();

        f.mock.fail_next(DriverOp::Start, DriverError::RejectedByHypervisor("no licence".into()));
        run(&f, Operation::Start).await.unwrap_err();
        assert_eq!(f.handle.status().unwrap(), Failed);

        assert!(run(&f, Operation::Start).await.is_err());
        assert_eq!(f.handle.status().unwrap(), Failed);

        let result = run(&f, Operation::Recover).await.unwrap();
        assert_eq!(result.status, Some(Stopped));
    }

    #[tokio::test]
    async fn test_unreachable_then_refresh_restores() {
        let f = fixture(fast_config());
        run(&f, Operation::Deploy).await.unwrap();
        run(&f, Operation::Start).await.unwrap();

        f.mock.set_reachable(false);
        let err = run(&f, Operation::Pause).await.unwrap_err();
        assert!(matches!(err, UnivorError::Driver(DriverError::Unreachable(_))));
        assert_eq!(f.handle.status().unwrap(), Unreachable);

        let err = run(&f, Operation::Refresh).await.unwrap_err();
        assert!(matches!(err, UnivorError::Driver(DriverError::Unreachable(_))));
        assert_eq!(f.handle.status().unwrap(), Unreachable);

        f.mock.set_reachable(true);
        let result = run(&f, Operation::Refresh).await.unwrap();
        assert_eq!(result.status, Some(Running));
    }

    #[tokio::test]
    async fn test_missing_vm_reverts_to_provisioned() {
        let f = fixture(fast_config());
        let vm_id = run(&f, Operation::Deploy).await.unwrap().vm_id.unwrap();

        f.mock.remove_vm(&vm_id);
        let err = run(&f, Operation::Start).await.unwrap_err();
        assert!(matches!(err, UnivorError::Driver(DriverError::ResourceMissing(_))));

        let desc = f.handle.snapshot().unwrap();
        assert_eq!(desc.status, Provisioned);
        assert!(desc.vm_id().is_err());
        assert!(desc.deployed_config.is_none());
    }

    #[tokio::test]
    async fn test_deploy_unreachable_stays_provisioned() {
        let f = fixture(fast_config());
        f.mock.set_reachable(false);
        run(&f, Operation::Deploy).await.unwrap_err();
        assert_eq!(f.handle.status().unwrap(), Provisioned);
    }

    #[tokio::test]
    async fn test_transient_retry_budget() {
        let f = fixture(EngineConfig { transient_retries: 2, ..fast_config() });
        f.mock.fail_next(DriverOp::Create, DriverError::Transient("busy".into()));
        f.mock.fail_next(DriverOp::Create, DriverError::Transient("busy".into()));
        assert_eq!(run(&f, Operation::Deploy).await.unwrap().status, Some(Created));

        for _ in 0..3 {
            f.mock.fail_next(DriverOp::Start, DriverError::Transient("busy".into()));
        }
        run(&f, Operation::Start).await.unwrap_err();
        assert_eq!(f.handle.status().unwrap(), Failed);
    }

    #[tokio::test]
    async fn test_reconfigure_delta_and_drift() {
        let f = fixture(fast_config());
        let vm_id = run(&f, Operation::Deploy).await.unwrap().vm_id.unwrap();

        let noop = run(&f, Operation::Reconfigure).await.unwrap();
        assert!(noop.detail.is_some());

        f.handle
            .update(|d| d.apply_edit(&Definition::from_value(json!({"memory": 8192})).unwrap()))
            .unwrap()
            .unwrap();
        run(&f, Operation::Reconfigure).await.unwrap();
        assert_eq!(f.mock.vm(&vm_id).unwrap().spec.memory_mib, 8192);

        let root = json!({"use_hypervisor": "ESXi_1", "use_prototype": "proto_other"});
        f.ctx.tree.set_common(&NodePath::root(), Definition::from_value(root).unwrap()).unwrap();
        let err = run(&f, Operation::Reconfigure).await.unwrap_err();
        assert!(matches!(err, UnivorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_undeploy_needs_policy() {
        let f = fixture(EngineConfig { undeploy_disk_policy: None, ..fast_config() });
        run(&f, Operation::Deploy).await.unwrap();

        let err = run(&f, Operation::Undeploy).await.unwrap_err();
        assert!(matches!(err, UnivorError::Validation(_)));
        assert_eq!(f.handle.status().unwrap(), Created);

        let params = CommandParams { release_disks: Some(false), ..Default::default() };
        execute(&f.ctx, &f.handle, 2, Operation::Undeploy, &params).await.unwrap();
        assert_eq!(f.mock.retained_disks(), vec!["vm1".to_string()]);
    }

    #[tokio::test]
    async fn test_graceful_stop_outlasts_driver_timeout() {
        let f = fixture(EngineConfig { driver_timeout_secs: 1, stop_timeout_secs: 2, ..fast_config() });
        run(&f, Operation::Deploy).await.unwrap();
        run(&f, Operation::Start).await.unwrap();

        f.mock.set_latency(Duration::from_millis(1500));
        let result = run(&f, Operation::Stop).await.unwrap();
        assert_eq!(result.status, Some(Stopped));
    }

    #[tokio::test]
    async fn test_unpersisted_deploy_reports_vm() {
        let f = fixture(fast_config());
        f.storage.set_failing(true);

        let err = run(&f, Operation::Deploy).await.unwrap_err();
        assert_eq!(f.mock.vm_count(), 1);
        assert_eq!(f.handle.status().unwrap(), Created);

        let vm_id = f.handle.snapshot().unwrap().vm_id.unwrap();
        match err {
            UnivorError::Storage(msg) => {
                assert!(msg.contains(&vm_id), "{}", msg);
                assert!(msg.contains("created"), "{}", msg);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_vm_name_collision_is_conflict() {
        let f = fixture(fast_config());
        let flat = f
            .ctx
            .tree
            .create_descriptor(&NodePath::root(), "a_b", Definition::from_value(json!({})).unwrap())
            .unwrap();
        let folder = f.ctx.tree.create_folder(&NodePath::root(), "a").unwrap();
        let nested = f
            .ctx
            .tree
            .create_descriptor(&folder, "b", Definition::from_value(json!({})).unwrap())
            .unwrap();

        execute(&f.ctx, &flat, 1, Operation::Deploy, &CommandParams::default()).await.unwrap();
        let err = execute(&f.ctx, &nested, 2, Operation::Deploy, &CommandParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UnivorError::Conflict(_)));
        assert_eq!(nested.status().unwrap(), Provisioned);
        assert_eq!(f.mock.vm_count(), 1);
    }
}
