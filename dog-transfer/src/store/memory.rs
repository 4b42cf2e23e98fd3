use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{store::TransferStore, TransferId, TransferRecord, TransferResult};

/// In-memory store for testing and development.
///
/// Clones share the same map, so a second manager built over a clone sees
/// what the first one persisted, as it would after a process restart.
#[derive(Clone, Default)]
pub struct MemoryTransferStore {
    records: Arc<RwLock<HashMap<TransferId, TransferRecord>>>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn load_all(&self) -> TransferResult<Vec<TransferRecord>> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    async fn upsert(&self, record: &TransferRecord) -> TransferResult<()> {
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: &TransferId) -> TransferResult<()> {
        self.records.write().remove(id);
        Ok(())
    }

    async fn get(&self, id: &TransferId) -> TransferResult<Option<TransferRecord>> {
        Ok(self.records.read().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransferRequest;

    #[tokio::test]
    async fn clones_share_records() {
        let store = MemoryTransferStore::new();
        let restarted = store.clone();

        let a = TransferRecord::from_request(TransferRequest::download("a", "k", "/tmp/a"), 2);
        let b = TransferRecord::from_request(TransferRequest::download("b", "k", "/tmp/b"), 1);
        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();

        assert_eq!(restarted.len(), 2);
        assert_eq!(restarted.load_all().await.unwrap(), vec![b.clone(), a.clone()]);
        assert_eq!(restarted.load_owner("a").await.unwrap(), vec![a.clone()]);

        restarted.remove(&a.id).await.unwrap();
        restarted.remove(&a.id).await.unwrap();
        assert_eq!(store.get(&a.id).await.unwrap(), None);
    }
}
