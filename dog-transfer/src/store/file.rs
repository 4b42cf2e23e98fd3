use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{store::TransferStore, TransferError, TransferId, TransferRecord, TransferResult};

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";

/// Directory-backed store: one JSON document per record.
///
/// Writes go to a temporary file which is synced and renamed over the
/// previous document, so readers only ever see a complete record. Unreadable
/// documents are skipped on load and reported through `tracing`.
pub struct FileTransferStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTransferStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> TransferResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            TransferError::store(format!("cannot create store at {}: {}", root.display(), e))
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &TransferId) -> PathBuf {
        self.root.join(format!("{}.{}", id.as_str(), RECORD_EXTENSION))
    }

    fn temp_path(&self, id: &TransferId) -> PathBuf {
        self.root.join(format!("{}.{}", id.as_str(), TEMP_EXTENSION))
    }

    async fn read_record(path: &Path) -> TransferResult<TransferRecord> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TransferStore for FileTransferStore {
    async fn load_all(&self) -> TransferResult<Vec<TransferRecord>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            TransferError::store(format!("cannot read store {}: {}", self.root.display(), e))
        })?;

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable transfer record {}: {}", path.display(), e),
            }
        }

        records.sort_by_key(|r| r.sequence);
        debug!("Loaded {} transfer records from {}", records.len(), self.root.display());
        Ok(records)
    }

    async fn upsert(&self, record: &TransferRecord) -> TransferResult<()> {
        let body = serde_json::to_vec_pretty(record)?;
        let temp = self.temp_path(&record.id);

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp, self.record_path(&record.id)).await?;
        Ok(())
    }

    async fn remove(&self, id: &TransferId) -> TransferResult<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &TransferId) -> TransferResult<Option<TransferRecord>> {
        let path = self.record_path(id);
        match tokio::fs::try_exists(&path).await? {
            true => Ok(Some(Self::read_record(&path).await?)),
            false => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByteRange, TransferRequest, TransferState};
    use tracing_test::traced_test;

    fn record(sequence: u64) -> TransferRecord {
        let request = TransferRequest::download("owner-a", "bucket/key", "/tmp/key.bin")
            .with_range(ByteRange::whole(64));
        TransferRecord::from_request(request, sequence)
    }

    #[tokio::test]
    async fn upsert_replaces_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransferStore::open(dir.path()).await.unwrap();

        let mut rec = record(1);
        store.upsert(&rec).await.unwrap();
        rec.transition(TransferState::InProgress).unwrap();
        rec.add_progress(32).unwrap();
        store.upsert(&rec).await.unwrap();

        let reopened = FileTransferStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load_all().await.unwrap();
        assert_eq!(loaded, vec![rec.clone()]);
        assert_eq!(reopened.get(&rec.id).await.unwrap(), Some(rec));
    }

    #[tokio::test]
    #[traced_test]
    async fn corrupt_documents_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransferStore::open(dir.path()).await.unwrap();
        store.upsert(&record(1)).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), b"{not json")
            .await
            .unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(logs_contain("Skipping unreadable transfer record"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransferStore::open(dir.path()).await.unwrap();
        let rec = record(1);
        store.upsert(&rec).await.unwrap();

        store.remove(&rec.id).await.unwrap();
        store.remove(&rec.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        assert_eq!(store.get(&rec.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn records_load_in_sequence_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTransferStore::open(dir.path()).await.unwrap();
        for seq in [3, 1, 2] {
            store.upsert(&record(seq)).await.unwrap();
        }
        let seqs: Vec<_> = store
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
