//! Persistence layer for transfer records
//!
//! Uses the sled embedded database so transfer history and in-flight
//! records survive restarts. Records are written on every change.

use bridge_types::{TransferId, TransferRecord};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

/// Bookkeeping about the store itself
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreMetadata {
    /// Records written since the store was created
    pub writes: u64,
    /// Unix timestamp of the last write
    pub last_write_ts: i64,
}

/// Persistent storage for transfer records
pub struct PersistentStore {
    db: Db,
    transfers: sled::Tree,
    metadata: sled::Tree,
}

impl PersistentStore {
    /// Open or create a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let transfers = db.open_tree("transfers")?;
        let metadata = db.open_tree("metadata")?;

        tracing::info!("Opened persistent store at {:?}", path.as_ref());

        Ok(Self {
            db,
            transfers,
            metadata,
        })
    }

    /// Store a record, replacing any previous version
    pub fn store_transfer(&self, record: &TransferRecord) -> anyhow::Result<()> {
        let bytes = bincode::serialize(record)?;
        self.transfers.insert(record.id.as_str().as_bytes(), bytes)?;

        let mut metadata = self.load_metadata()?.unwrap_or_default();
        metadata.writes += 1;
        metadata.last_write_ts = chrono::Utc::now().timestamp();
        self.metadata.insert("store", bincode::serialize(&metadata)?)?;
        Ok(())
    }

    pub fn get_transfer(&self, id: &TransferId) -> anyhow::Result<Option<TransferRecord>> {
        match self.transfers.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get all records (for loading into memory)
    pub fn get_all_transfers(&self) -> anyhow::Result<Vec<TransferRecord>> {
        let mut records = Vec::new();
        for result in self.transfers.iter() {
            let (_, value) = result?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    pub fn load_metadata(&self) -> anyhow::Result<Option<StoreMetadata>> {
        match self.metadata.get("store")? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }
}

/// Extension trait to add persistence to TransferStore
pub trait TransferStorePersistence {
    /// Save all records to persistent storage
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;

    /// Load all records from persistent storage
    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize>;
}

impl TransferStorePersistence for crate::TransferStore {
    fn save_to_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let records = self.all();
        for record in &records {
            store.store_transfer(record)?;
        }

        store.flush()?;
        tracing::info!("Saved {} transfers to disk", records.len());

        Ok(records.len())
    }

    fn load_from_disk(&self, store: &PersistentStore) -> anyhow::Result<usize> {
        let records = store.get_all_transfers()?;
        let count = records.len();

        for record in records {
            if !record.state.is_terminal() {
                tracing::warn!(
                    transfer_id = %record.id,
                    state = %record.state,
                    source_tx = ?record.source_tx_ref,
                    bridge_message = ?record.bridge_message_ref,
                    "Transfer was in flight at shutdown, needs manual reconciliation"
                );
            }
            self.insert(record);
        }

        tracing::info!("Loaded {} transfers from disk", count);

        Ok(count)
    }
}
