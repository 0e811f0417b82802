//! In-memory transfer record storage using DashMap for concurrent access

use bridge_types::{TransferId, TransferRecord};
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe in-memory transfer storage
///
/// Records are mutated only through [`TransferStore::update`], which holds
/// the entry's write guard for the duration of the closure.
#[derive(Clone, Default)]
pub struct TransferStore {
    records: Arc<DashMap<TransferId, TransferRecord>>,
}

impl TransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of a record
    pub fn get(&self, id: &TransferId) -> Option<TransferRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn insert(&self, record: TransferRecord) {
        self.records.insert(record.id.clone(), record);
    }

    /// Mutate a record under its write guard
    pub fn update<R>(&self, id: &TransferId, f: impl FnOnce(&mut TransferRecord) -> R) -> Option<R> {
        self.records.get_mut(id).map(|mut r| f(r.value_mut()))
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.records.contains_key(id)
    }

    /// Find a record by id, tx hash or bridge message reference
    pub fn find_by_reference(&self, reference: &str) -> Option<TransferRecord> {
        if let Some(record) = self.get(&TransferId::new(reference)) {
            return Some(record);
        }
        self.records
            .iter()
            .find(|r| r.value().matches_reference(reference))
            .map(|r| r.value().clone())
    }

    pub fn all(&self) -> Vec<TransferRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Records that have not reached a terminal state
    pub fn in_flight(&self) -> Vec<TransferRecord> {
        self.records
            .iter()
            .filter(|r| !r.value().state.is_terminal())
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
