//! Per-descriptor execution slots.
//!
//! Each descriptor that ever received a command owns a FIFO of queued jobs,
//! a `draining` flag telling whether a runner task is attached, and an async
//! mutex that whoever mutates the descriptor holds for the duration of the
//! change. Slot entries are only dropped when the descriptor itself is
//! removed, so every holder always contends on the same mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::descriptor::{DescriptorHandle, DescriptorId};
use crate::error::{poisoned, Result};
use crate::operation::Operation;

use super::command::CommandParams;

/// One queued unit of work: one operation against one descriptor.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub command_id: u64,
    /// Index of the target inside the command record
    pub index: usize,
    pub operation: Operation,
    pub params: Arc<CommandParams>,
    pub handle: Arc<DescriptorHandle>,
}

#[derive(Debug, Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    queue: VecDeque<Job>,
    draining: bool,
    active: Option<u64>,
}

impl Slot {
    /// A runner that is attached but has nothing queued is not busy: it
    /// finds the queue empty and detaches.
    fn is_busy(&self) -> bool {
        self.active.is_some()
            || !self.queue.is_empty()
            || self.lock.try_lock().is_err()
    }
}

#[derive(Debug, Default)]
pub(crate) struct SlotTable {
    slots: Mutex<HashMap<DescriptorId, Slot>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<DescriptorId, Slot>>> {
        self.slots.lock().map_err(poisoned)
    }

    /// Queue a job. Returns true when the caller must start a runner.
    pub fn enqueue(&self, id: DescriptorId, job: Job) -> Result<bool> {
        let mut table = self.table()?;
        let slot = table.entry(id).or_default();
        slot.queue.push_back(job);
        if slot.draining {
            Ok(false)
        } else {
            slot.draining = true;
            Ok(true)
        }
    }

    /// Pop the next job and mark it active. `None` detaches the runner.
    pub fn next_job(&self, id: DescriptorId) -> Result<Option<(Job, Arc<AsyncMutex<()>>)>> {
        let mut table = self.table()?;
        let Some(slot) = table.get_mut(&id) else {
            return Ok(None);
        };

        match slot.queue.pop_front() {
            Some(job) => {
                slot.active = Some(job.command_id);
                Ok(Some((job, slot.lock.clone())))
            }
            None => {
                slot.draining = false;
                Ok(None)
            }
        }
    }

    /// The active job finished.
    pub fn finish(&self, id: DescriptorId) -> Result<()> {
        if let Some(slot) = self.table()?.get_mut(&id) {
            slot.active = None;
        }
        Ok(())
    }

    /// Remove every queued, not yet started job of a command.
    pub fn withdraw(&self, command_id: u64) -> Result<Vec<Job>> {
        let mut withdrawn = Vec::new();
        for slot in self.table()?.values_mut() {
            let (taken, kept): (VecDeque<Job>, VecDeque<Job>) =
                slot.queue.drain(..).partition(|job| job.command_id == command_id);
            slot.queue = kept;
            withdrawn.extend(taken);
        }
        Ok(withdrawn)
    }

    pub fn is_busy(&self, id: DescriptorId) -> bool {
        self.table()
            .map(|table| table.get(&id).map_or(false, Slot::is_busy))
            .unwrap_or(true)
    }

    /// Command currently executing against the descriptor.
    pub fn in_flight(&self, id: DescriptorId) -> Result<Option<u64>> {
        Ok(self.table()?.get(&id).and_then(|slot| slot.active))
    }

    /// Take the slot for a synchronous change, if nothing is queued or
    /// running against the descriptor.
    pub fn try_acquire(&self, id: DescriptorId) -> Result<Option<OwnedMutexGuard<()>>> {
        let mut table = self.table()?;
        let slot = table.entry(id).or_default();
        if slot.is_busy() {
            return Ok(None);
        }
        Ok(slot.lock.clone().try_lock_owned().ok())
    }

    /// Drop the slot of a removed descriptor.
    pub fn forget(&self, id: DescriptorId) -> Result<()> {
        self.table()?.remove(&id);
        Ok(())
    }
}
