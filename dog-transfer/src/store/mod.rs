pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::{TransferId, TransferRecord, TransferResult};

pub use file::FileTransferStore;
pub use memory::MemoryTransferStore;

/// Durable storage for transfer records
///
/// Each record is stored independently; parents and blocks reference each
/// other by id only. `upsert` must replace the whole record atomically so a
/// crash never leaves a half-written state/progress pair behind.
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Load every stored record. Must not need network access.
    async fn load_all(&self) -> TransferResult<Vec<TransferRecord>>;

    /// Insert or atomically replace a record
    async fn upsert(&self, record: &TransferRecord) -> TransferResult<()>;

    /// Delete a record; deleting a missing record is not an error
    async fn remove(&self, id: &TransferId) -> TransferResult<()>;

    /// Get one record
    async fn get(&self, id: &TransferId) -> TransferResult<Option<TransferRecord>> {
        Ok(self.load_all().await?.into_iter().find(|r| &r.id == id))
    }

    /// Load the records belonging to one owner
    async fn load_owner(&self, owner_id: &str) -> TransferResult<Vec<TransferRecord>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.owner_id == owner_id)
            .collect())
    }
}
