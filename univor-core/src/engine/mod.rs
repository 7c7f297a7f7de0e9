//! Command engine.
//!
//! Synchronous operations (`show`, `edit`, `provision`, `deprovision`) run
//! inside `submit`. Everything that talks to a driver is queued: one job per
//! target descriptor goes into that descriptor's FIFO, and a runner task
//! drains the FIFO one job at a time while holding a worker-pool permit and
//! the descriptor's slot.
//!
//! ```text
//! submit ──▶ per-target checks ──▶ ResultsStore (Pending)
//!                │
//!                ▼
//!        SlotTable FIFO ──▶ runner ── permit ── slot ──▶ lifecycle::execute
//!                                                             │
//!                               ResultsStore ◀── CommandLog ◀─┘
//! ```

pub mod command;
pub mod log;
pub(crate) mod slots;
pub(crate) mod store;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, OwnedMutexGuard, Semaphore};
use tracing::{debug, error, info, instrument};

use crate::access::AccessControl;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::definition::Definition;
use crate::descriptor::{Descriptor, DescriptorHandle, DescriptorId};
use crate::error::{poisoned, ErrorInfo, Result, UnivorError};
use crate::lifecycle::{self, check_transition, check_vm_name, undeploy_policy};
use crate::operation::Operation;
use crate::path::NodePath;
use crate::registry::DriverRegistry;
use crate::storage::{FolderRecord, Storage};
use crate::tree::{DescriptorTree, Node};

use command::{CommandParams, CommandRecord, OperationResult, Submission, TargetResult, TargetState};
use log::{CommandLog, CommandLogEntry, Outcome};
use slots::{Job, SlotTable};
use store::ResultsStore;

/// The orchestration engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: Context,
    slots: SlotTable,
    results: Mutex<ResultsStore>,
    finished: Notify,
    workers: Arc<Semaphore>,
    next_command: AtomicU64,
    log: CommandLog,
}

/// A resolved target, or the reason it could not be resolved.
enum Target {
    Ready(Arc<DescriptorHandle>),
    Invalid(NodePath, UnivorError),
}

impl Engine {
    pub fn new(ctx: Context) -> Self {
        let mut log = CommandLog::new();
        if let Some(path) = &ctx.config.command_log_path {
            log = log.with_file(path);
        }

        Self {
            inner: Arc::new(Inner {
                slots: SlotTable::new(),
                results: Mutex::new(ResultsStore::new(ctx.config.results_capacity)),
                finished: Notify::new(),
                workers: Arc::new(Semaphore::new(ctx.config.workers.max(1))),
                next_command: AtomicU64::new(1),
                log,
                ctx,
            }),
        }
    }

    /// Load the tree from storage and start an engine on it.
    pub async fn open(
        storage: Arc<dyn Storage>,
        drivers: DriverRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        let snapshot = storage.load_tree().await?;
        let tree = DescriptorTree::from_snapshot(snapshot)?;
        info!(
            workers = config.workers,
            hypervisors = ?drivers.names(),
            "Engine ready"
        );
        Ok(Self::new(Context::new(tree, storage, drivers, config)))
    }

    pub fn context(&self) -> &Context {
        &self.inner.ctx
    }

    pub fn tree(&self) -> &DescriptorTree {
        &self.inner.ctx.tree
    }

    pub fn command_log(&self) -> &CommandLog {
        &self.inner.log
    }

    // =========================================================================
    // Tree operations
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn create_folder(&self, parent: &NodePath, name: &str) -> Result<NodePath> {
        let path = self.tree().create_folder(parent, name)?;
        self.storage().save_folder(&FolderRecord::new(path.clone())).await?;
        Ok(path)
    }

    #[instrument(skip(self))]
    pub async fn remove_folder(&self, path: &NodePath) -> Result<()> {
        self.tree().remove_folder(path)?;
        self.storage().delete_folder(path).await
    }

    /// Move a folder or descriptor. Returns the new path.
    ///
    /// The slot of every descriptor in the moved subtree is held until the
    /// rebased records are persisted.
    #[instrument(skip(self))]
    pub async fn move_node(&self, path: &NodePath, new_parent: &NodePath) -> Result<NodePath> {
        if path.is_root() {
            return Err(UnivorError::Validation("The root cannot be moved".to_string()));
        }
        let slots = &self.inner.slots;
        let mut held = HashSet::new();
        let mut guards = Vec::new();
        for handle in self.tree().descriptors_under(path)? {
            match slots.try_acquire(handle.id())? {
                Some(guard) => {
                    held.insert(handle.id());
                    guards.push(guard);
                }
                None => {
                    return Err(UnivorError::Conflict(format!(
                        "{} has a command in progress", handle.full_name()?
                    )))
                }
            }
        }

        let outcome = self
            .tree()
            .move_node(path, new_parent, |id| !held.contains(&id) && slots.is_busy(id))?;

        for (old, record) in &outcome.folders {
            self.storage().delete_folder(old).await?;
            self.storage().save_folder(record).await?;
        }
        for (old, moved) in &outcome.descriptors {
            self.storage().delete_descriptor(old).await?;
            let current = match self.tree().descriptor(&moved.full_name) {
                Ok(handle) => handle.snapshot()?,
                Err(_) => moved.clone(),
            };
            self.storage().save_descriptor(&current).await?;
        }

        drop(guards);
        Ok(outcome.to)
    }

    /// Replace a folder's common definition. Takes effect on the next
    /// computation of every descriptor beneath it.
    #[instrument(skip(self, definition))]
    pub async fn set_common_definition(&self, folder: &NodePath, definition: Definition) -> Result<()> {
        let record = self.tree().set_common(folder, definition)?;
        self.storage().save_folder(&record).await
    }

    #[instrument(skip(self))]
    pub async fn set_access(&self, path: &NodePath, access: AccessControl) -> Result<()> {
        if let Node::Descriptor(handle) = self.tree().resolve(path)? {
            let _slot = self.acquire_idle(&handle)?;
            self.tree().set_access(path, access)?;
            return lifecycle::persist(&self.inner.ctx, &handle).await;
        }

        match self.tree().set_access(path, access)? {
            Node::Folder(info) | Node::Common(info) => self.storage().save_folder(&info.record()).await,
            Node::Descriptor(_) => Ok(()),
        }
    }

    /// Computed definition of a descriptor.
    pub fn compute(&self, path: &NodePath) -> Result<Definition> {
        let handle = self.tree().descriptor(path)?;
        self.tree().compute(&handle)
    }

    /// Current state of a descriptor.
    pub fn descriptor(&self, path: &NodePath) -> Result<Descriptor> {
        self.tree().descriptor(path)?.snapshot()
    }

    /// Whether `principal` may run `operation` on `path`. Unknown paths are
    /// never permitted.
    pub fn is_permitted(&self, principal: &str, path: &NodePath, operation: Operation) -> bool {
        self.tree()
            .access_for(path)
            .map(|acl| acl.permits(principal, operation))
            .unwrap_or(false)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Submit `operation` against `targets`.
    ///
    /// Folder targets expand to every descriptor beneath them. With a single
    /// resolved target, submission-time errors are returned directly; with
    /// several they are recorded per target and the rest proceed.
    #[instrument(skip(self, targets, params), fields(targets = targets.len()))]
    pub async fn submit(
        &self,
        operation: Operation,
        targets: &[NodePath],
        params: CommandParams,
    ) -> Result<Submission> {
        if targets.is_empty() {
            return Err(UnivorError::Validation("A command needs at least one target".to_string()));
        }
        let command_id = self.inner.next_command.fetch_add(1, Ordering::SeqCst);

        if operation == Operation::Provision {
            return self.provision(command_id, targets, &params).await;
        }

        let resolved = self.expand(targets)?;
        let single = resolved.len() == 1;

        if operation.is_async() {
            self.submit_async(command_id, operation, resolved, params, single)
        } else {
            self.run_sync(command_id, operation, resolved, &params, single).await
        }
    }

    /// Current record of a command.
    pub fn poll(&self, command_id: u64) -> Result<CommandRecord> {
        self.results()?
            .get(command_id)
            .cloned()
            .ok_or_else(|| UnivorError::NotFound(format!("Command {}", command_id)))
    }

    /// Wait until a command is final.
    pub async fn wait(&self, command_id: u64) -> Result<CommandRecord> {
        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self.poll(command_id)?;
            if record.is_final() {
                return Ok(record);
            }
            notified.await;
        }
    }

    /// Withdraw the queued, not yet started jobs of a command.
    #[instrument(skip(self))]
    pub fn cancel(&self, command_id: u64) -> Result<CommandRecord> {
        let record = self.poll(command_id)?;
        if record.is_final() {
            return Err(UnivorError::State(format!(
                "Command {} already {}", command_id, record.state
            )));
        }

        let withdrawn = self.inner.slots.withdraw(command_id)?;
        if withdrawn.is_empty() {
            return Err(UnivorError::State(format!(
                "Command {} has no queued work left to withdraw", command_id
            )));
        }

        let mut latest = record;
        for job in withdrawn {
            if let Some(updated) = self.inner.settle(&job, TargetState::Withdrawn)? {
                latest = updated;
            }
        }
        info!(command_id, state = %latest.state, "Command cancelled");
        Ok(latest)
    }

    /// Command currently executing against a descriptor.
    pub fn in_flight(&self, path: &NodePath) -> Result<Option<u64>> {
        let handle = self.tree().descriptor(path)?;
        self.inner.slots.in_flight(handle.id())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.ctx.storage
    }

    fn results(&self) -> Result<MutexGuard<'_, ResultsStore>> {
        self.inner.results.lock().map_err(poisoned)
    }

    fn acquire_idle(&self, handle: &DescriptorHandle) -> Result<OwnedMutexGuard<()>> {
        self.inner.slots.try_acquire(handle.id())?.ok_or_else(|| {
            let busy = self.inner.slots.in_flight(handle.id()).ok().flatten();
            UnivorError::State(match busy {
                Some(id) => format!("Descriptor is busy with command {}", id),
                None => "Descriptor has queued commands".to_string(),
            })
        })
    }

    fn expand(&self, targets: &[NodePath]) -> Result<Vec<Target>> {
        let mut resolved = Vec::new();
        for path in targets {
            match self.tree().descriptors_under(path) {
                Ok(handles) if handles.is_empty() => resolved.push(Target::Invalid(
                    path.clone(),
                    UnivorError::Validation(format!("No descriptors under {}", path)),
                )),
                Ok(handles) => resolved.extend(handles.into_iter().map(Target::Ready)),
                Err(e) if targets.len() == 1 => return Err(e),
                Err(e) => resolved.push(Target::Invalid(path.clone(), e)),
            }
        }
        Ok(resolved)
    }

    /// Checks that need no driver, done at submission for idle descriptors.
    fn precheck(&self, operation: Operation, handle: &DescriptorHandle, params: &CommandParams) -> Result<()> {
        if self.inner.slots.is_busy(handle.id()) {
            return Ok(());
        }
        let ctx = &self.inner.ctx;
        check_transition(operation, handle.status()?)?;

        match operation {
            Operation::Deploy => {
                let computed = ctx.tree.compute(handle)?;
                if let Some(name) = computed.use_hypervisor() {
                    ctx.drivers.get(name)?;
                    let desc = handle.snapshot()?;
                    let vm_name = computed.vm_name().map(str::to_string).unwrap_or_else(|| desc.default_vm_name());
                    check_vm_name(ctx, handle, name, &vm_name)?;
                }
                Ok(())
            }
            Operation::Undeploy => undeploy_policy(ctx, params).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn submit_async(
        &self,
        command_id: u64,
        operation: Operation,
        resolved: Vec<Target>,
        params: CommandParams,
        single: bool,
    ) -> Result<Submission> {
        let mut targets = Vec::with_capacity(resolved.len());
        let mut jobs = Vec::new();

        for target in resolved {
            match target {
                Target::Invalid(path, err) => {
                    if single {
                        return Err(err);
                    }
                    targets.push(TargetResult { path, state: TargetState::Failed(err.into()) });
                }
                Target::Ready(handle) => {
                    let path = handle.full_name()?;
                    match self.precheck(operation, &handle, &params) {
                        Ok(()) => {
                            jobs.push((targets.len(), handle));
                            targets.push(TargetResult { path, state: TargetState::Pending });
                        }
                        Err(err) if single => return Err(err),
                        Err(err) => {
                            targets.push(TargetResult { path, state: TargetState::Failed(err.into()) })
                        }
                    }
                }
            }
        }

        let record = CommandRecord::new(command_id, operation, targets);
        for target in &record.targets {
            if let TargetState::Failed(info) = &target.state {
                self.inner.log_target(command_id, operation, &target.path, Outcome::Failed, Some(info));
            }
        }
        self.results()?.insert(record);

        let params = Arc::new(params);
        for (index, handle) in jobs {
            let id = handle.id();
            let job = Job {
                command_id,
                index,
                operation,
                params: params.clone(),
                handle,
            };
            if self.inner.slots.enqueue(id, job)? {
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.drain(id).await });
            }
        }

        debug!(command_id, operation = %operation, "Command queued");
        Ok(Submission::Pending { command_id })
    }

    async fn run_sync(
        &self,
        command_id: u64,
        operation: Operation,
        resolved: Vec<Target>,
        params: &CommandParams,
        single: bool,
    ) -> Result<Submission> {
        let mut outcomes = Vec::with_capacity(resolved.len());

        for target in resolved {
            let (path, result) = match target {
                Target::Invalid(path, err) => (path, Err(err)),
                Target::Ready(handle) => {
                    let path = handle.full_name()?;
                    let result = self.sync_one(operation, &handle, params).await;
                    (path, result)
                }
            };

            let state = match result {
                Ok(result) => TargetState::Succeeded(result),
                Err(err) if single => return Err(err),
                Err(err) => TargetState::Failed(err.into()),
            };
            outcomes.push(TargetResult { path, state });
        }

        self.complete_sync(command_id, operation, outcomes)
    }

    async fn sync_one(
        &self,
        operation: Operation,
        handle: &Arc<DescriptorHandle>,
        params: &CommandParams,
    ) -> Result<OperationResult> {
        // Reads never wait for the slot.
        let _slot = match operation {
            Operation::Show => None,
            _ => Some(self.acquire_idle(handle)?),
        };
        let ctx = &self.inner.ctx;

        match operation {
            Operation::Show => {
                let descriptor = handle.snapshot()?;
                Ok(OperationResult {
                    status: Some(descriptor.status),
                    vm_id: descriptor.vm_id().ok().map(str::to_string),
                    detail: None,
                    definition: Some(ctx.tree.compute_partial(handle)?),
                })
            }
            Operation::Edit => {
                let patch = params.definition.as_ref().ok_or_else(|| {
                    UnivorError::Validation("edit needs a definition patch".to_string())
                })?;
                handle.update(|d| d.apply_edit(patch))??;
                lifecycle::persist(ctx, handle).await?;
                Ok(OperationResult {
                    status: Some(handle.status()?),
                    ..Default::default()
                })
            }
            Operation::Deprovision => {
                let path = handle.full_name()?;
                ctx.tree.remove_descriptor(&path, |_| false)?;
                ctx.storage.delete_descriptor(&path).await?;
                self.inner.slots.forget(handle.id())?;
                Ok(OperationResult {
                    detail: Some(format!("{} removed", path)),
                    ..Default::default()
                })
            }
            other => Err(UnivorError::Internal(format!("{} is not a synchronous operation", other))),
        }
    }

    async fn provision(
        &self,
        command_id: u64,
        targets: &[NodePath],
        params: &CommandParams,
    ) -> Result<Submission> {
        let definition = params.definition.clone().unwrap_or_default();
        let single = targets.len() == 1;
        let mut outcomes = Vec::with_capacity(targets.len());

        for path in targets {
            let result = self.provision_one(path, definition.clone()).await;
            let state = match result {
                Ok(result) => TargetState::Succeeded(result),
                Err(err) if single => return Err(err),
                Err(err) => TargetState::Failed(err.into()),
            };
            outcomes.push(TargetResult { path: path.clone(), state });
        }

        self.complete_sync(command_id, Operation::Provision, outcomes)
    }

    async fn provision_one(&self, path: &NodePath, definition: Definition) -> Result<OperationResult> {
        let (parent, name) = match (path.parent(), path.name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => return Err(UnivorError::Validation("Cannot provision the root".to_string())),
        };

        let handle = self.tree().create_descriptor(&parent, name, definition)?;
        let _slot = self.acquire_idle(&handle)?;
        lifecycle::persist(&self.inner.ctx, &handle).await?;
        Ok(OperationResult {
            status: Some(handle.status()?),
            ..Default::default()
        })
    }

    fn complete_sync(
        &self,
        command_id: u64,
        operation: Operation,
        outcomes: Vec<TargetResult>,
    ) -> Result<Submission> {
        for target in &outcomes {
            let (outcome, error) = match &target.state {
                TargetState::Failed(info) => (Outcome::Failed, Some(info)),
                _ => (Outcome::Succeeded, None),
            };
            self.inner.log_target(command_id, operation, &target.path, outcome, error);
        }

        self.results()?.insert(CommandRecord::new(command_id, operation, outcomes.clone()));
        self.inner.finished.notify_waiters();
        Ok(Submission::Completed { command_id, outcomes })
    }
}

impl Inner {
    /// Runner for one descriptor: executes its queued jobs in order until the
    /// queue is empty.
    async fn drain(self: Arc<Self>, id: DescriptorId) {
        loop {
            let permit = match self.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let (job, lock) = match self.slots.next_job(id) {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(e) => {
                    error!(descriptor = %id, error = %e, "Runner stopped");
                    break;
                }
            };

            let guard = lock.lock_owned().await;
            if let Err(e) = self.mark_running(&job) {
                error!(command_id = job.command_id, error = %e, "Failed to update command record");
            }

            let result = lifecycle::execute(
                &self.ctx,
                &job.handle,
                job.command_id,
                job.operation,
                &job.params,
            )
            .await;

            if let Err(e) = self.slots.finish(id) {
                error!(descriptor = %id, error = %e, "Failed to release slot");
            }
            drop(guard);
            drop(permit);

            let state = match result {
                Ok(result) => TargetState::Succeeded(result),
                Err(err) => TargetState::Failed(err.into()),
            };
            if let Err(e) = self.settle(&job, state) {
                error!(command_id = job.command_id, error = %e, "Failed to record command outcome");
            }
        }
    }

    fn mark_running(&self, job: &Job) -> Result<()> {
        let mut results = self.results.lock().map_err(poisoned)?;
        results.update(job.command_id, |record| {
            if let Some(target) = record.targets.get_mut(job.index) {
                target.state = TargetState::Running;
            }
        });
        Ok(())
    }

    /// Record the final state of one target and wake waiters.
    fn settle(&self, job: &Job, state: TargetState) -> Result<Option<CommandRecord>> {
        let (outcome, error) = match &state {
            TargetState::Succeeded(_) => (Outcome::Succeeded, None),
            TargetState::Failed(info) => (Outcome::Failed, Some(info.clone())),
            _ => (Outcome::Withdrawn, None),
        };

        let updated = {
            let mut results = self.results.lock().map_err(poisoned)?;
            results.update(job.command_id, |record| {
                if let Some(target) = record.targets.get_mut(job.index) {
                    target.state = state;
                }
            })
        };

        let path = match &updated {
            Some(record) => record.targets.get(job.index).map(|t| t.path.clone()),
            None => None,
        };
        let path = match path {
            Some(path) => path,
            None => job.handle.full_name()?,
        };
        self.log_target(job.command_id, job.operation, &path, outcome, error.as_ref());

        self.finished.notify_waiters();
        Ok(updated)
    }

    fn log_target(
        &self,
        command_id: u64,
        operation: Operation,
        path: &NodePath,
        outcome: Outcome,
        error: Option<&ErrorInfo>,
    ) {
        let mut entry = CommandLogEntry::new(command_id, operation, path.clone(), outcome);
        if let Some(info) = error {
            entry = entry.with_error(info.kind);
        }
        self.log.record(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::time::Duration;
    use univor_driver::MockDriver;

    async fn engine_with(mock: Arc<MockDriver>) -> Engine {
        let config = EngineConfig {
            retry_backoff_ms: 1,
            ..Default::default()
        };
        let drivers = DriverRegistry::new().with_driver(mock);
        let engine = Engine::open(Arc::new(MemoryStorage::new()), drivers, config).await.unwrap();

        let common = json!({"use_hypervisor": "ESXi_1", "use_prototype": "proto_docker"});
        engine
            .set_common_definition(&NodePath::root(), Definition::from_value(common).unwrap())
            .await
            .unwrap();
        engine
    }

    async fn provision(engine: &Engine, path: &str) -> NodePath {
        let path = NodePath::parse(path).unwrap();
        engine
            .submit(Operation::Provision, &[path.clone()], CommandParams::default())
            .await
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_submit_needs_targets() {
        let engine = engine_with(Arc::new(MockDriver::new("ESXi_1"))).await;
        let err = engine.submit(Operation::Deploy, &[], CommandParams::default()).await.unwrap_err();
        assert!(matches!(err, UnivorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_show_is_synchronous() {
        let engine = engine_with(Arc::new(MockDriver::new("ESXi_1"))).await;
        let vm = provision(&engine, "/vm1").await;

        let submitted = engine.submit(Operation::Show, &[vm], CommandParams::default()).await.unwrap();
        let command_id = submitted.command_id();
        let Submission::Completed { outcomes, .. } = submitted else {
            panic!("show must complete synchronously");
        };
        let TargetState::Succeeded(result) = &outcomes[0].state else {
            panic!("show failed");
        };
        assert_eq!(result.status, Some(crate::descriptor::DescriptorStatus::Provisioned));
        let definition = result.definition.as_ref().unwrap();
        assert_eq!(definition.use_prototype(), Some("proto_docker"));

        assert!(engine.poll(command_id).unwrap().is_final());
    }

    #[tokio::test]
    async fn test_sync_operation_rejected_while_busy() {
        let mock = Arc::new(MockDriver::new("ESXi_1"));
        mock.set_latency(Duration::from_millis(200));
        let engine = engine_with(mock).await;
        let vm = provision(&engine, "/vm1").await;

        let deploy = engine.submit(Operation::Deploy, &[vm.clone()], CommandParams::default()).await.unwrap();
        let patch = Definition::from_value(json!({"memory": 1024})).unwrap();
        let err = engine
            .submit(Operation::Edit, &[vm.clone()], CommandParams::with_definition(patch))
            .await
            .unwrap_err();
        assert!(matches!(err, UnivorError::State(_)));

        let record = engine.wait(deploy.command_id()).await.unwrap();
        assert_eq!(record.state, command::CommandState::Succeeded);
        assert_eq!(engine.in_flight(&vm).unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancel_withdraws_queued_job() {
        let mock = Arc::new(MockDriver::new("ESXi_1"));
        mock.set_latency(Duration::from_millis(200));
        let engine = engine_with(mock.clone()).await;
        let vm = provision(&engine, "/vm1").await;

        let deploy = engine.submit(Operation::Deploy, &[vm.clone()], CommandParams::default()).await.unwrap();
        let start = engine.submit(Operation::Start, &[vm.clone()], CommandParams::default()).await.unwrap();

        let cancelled = engine.cancel(start.command_id()).unwrap();
        assert_eq!(cancelled.state, command::CommandState::Cancelled);
        assert!(engine.cancel(start.command_id()).is_err());

        engine.wait(deploy.command_id()).await.unwrap();
        let descriptor = engine.descriptor(&vm).unwrap();
        assert_eq!(descriptor.status, crate::descriptor::DescriptorStatus::Created);
        assert!(mock.calls().iter().all(|c| c.op != univor_driver::DriverOp::Start));
    }

    #[tokio::test]
    async fn test_poll_unknown_command() {
        let engine = engine_with(Arc::new(MockDriver::new("ESXi_1"))).await;
        assert!(matches!(engine.poll(42), Err(UnivorError::NotFound(_))));
    }
}
