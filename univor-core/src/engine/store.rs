//! Results store keyed by command id.

use std::collections::{HashMap, VecDeque};

use super::command::CommandRecord;

/// Holds every pending command and up to `capacity` finished ones; the
/// oldest finished command is evicted first.
#[derive(Debug)]
pub(crate) struct ResultsStore {
    records: HashMap<u64, CommandRecord>,
    finished: VecDeque<u64>,
    capacity: usize,
}

impl ResultsStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            finished: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert a new record; final records are retired right away.
    pub fn insert(&mut self, record: CommandRecord) {
        let id = record.id;
        let is_final = record.is_final();
        self.records.insert(id, record);
        if is_final {
            self.retire(id);
        }
    }

    pub fn get(&self, id: u64) -> Option<&CommandRecord> {
        self.records.get(&id)
    }

    /// Apply `f` and re-aggregate. Returns the updated record, or `None`
    /// if the id is unknown (or already evicted).
    pub fn update(&mut self, id: u64, f: impl FnOnce(&mut CommandRecord)) -> Option<CommandRecord> {
        let record = self.records.get_mut(&id)?;
        let was_final = record.is_final();
        f(record);
        record.refresh_state();
        let updated = record.clone();

        if !was_final && updated.is_final() {
            self.retire(id);
        }
        Some(updated)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    fn retire(&mut self, id: u64) {
        self.finished.push_back(id);
        while self.finished.len() > self.capacity {
            if let Some(oldest) = self.finished.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }
}
