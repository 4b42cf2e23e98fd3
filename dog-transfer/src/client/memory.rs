use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use crate::client::{ByteStream, ObjectHead, TransferClient};
use crate::{BlockId, ByteRange, ServiceError};

/// Which call an injected fault applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Head,
    Read,
    Write,
    Commit,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    sha256: Option<String>,
}

struct ServiceState {
    fingerprint: String,
    objects: RwLock<HashMap<String, StoredObject>>,
    staged: RwLock<HashMap<(String, BlockId), Bytes>>,
    faults: Mutex<HashMap<FaultPoint, VecDeque<ServiceError>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

/// In-memory object service for testing and development.
///
/// Objects are published with their SHA-256 so downloads can be verified.
/// Faults can be queued per call type to exercise retry and failure paths,
/// and a per-chunk delay keeps transfers in flight long enough to pause them.
#[derive(Clone)]
pub struct MemoryBlobService {
    state: Arc<ServiceState>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    metadata_delay: Option<Duration>,
}

impl MemoryBlobService {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ServiceState {
                fingerprint: fingerprint.into(),
                objects: RwLock::new(HashMap::new()),
                staged: RwLock::new(HashMap::new()),
                faults: Mutex::new(HashMap::new()),
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
            chunk_size: 64 * 1024,
            chunk_delay: None,
            metadata_delay: None,
        }
    }

    /// Size of the chunks read streams are cut into
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep between streamed chunks and before each block write
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Sleep before answering `head` and `commit_blocks`
    pub fn with_metadata_delay(mut self, delay: Duration) -> Self {
        self.metadata_delay = Some(delay);
        self
    }

    /// Store an object, publishing its SHA-256
    pub fn put_object(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        let data = data.into();
        let sha256 = Some(hex::encode(Sha256::digest(&data)));
        self.state
            .objects
            .write()
            .insert(key.into(), StoredObject { data, sha256 });
    }

    /// Store an object with an explicit (possibly wrong) published hash
    pub fn put_object_with_hash(
        &self,
        key: impl Into<String>,
        data: impl Into<Bytes>,
        sha256: Option<String>,
    ) {
        self.state.objects.write().insert(
            key.into(),
            StoredObject {
                data: data.into(),
                sha256,
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.objects.read().get(key).map(|o| o.data.clone())
    }

    /// Make the next call at `point` fail with `error`
    pub fn inject_fault(&self, point: FaultPoint, error: ServiceError) {
        self.state
            .faults
            .lock()
            .entry(point)
            .or_default()
            .push_back(error);
    }

    /// Number of `read_range` calls served
    pub fn read_count(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Number of `write_block` calls served
    pub fn write_count(&self) -> u64 {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn staged_block_count(&self, remote: &str) -> usize {
        self.state
            .staged
            .read()
            .keys()
            .filter(|(key, _)| key == remote)
            .count()
    }

    fn take_fault(&self, point: FaultPoint) -> Result<(), ServiceError> {
        match self
            .state
            .faults
            .lock()
            .get_mut(&point)
            .and_then(|queue| queue.pop_front())
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn stored(&self, remote: &str) -> Result<StoredObject, ServiceError> {
        self.state
            .objects
            .read()
            .get(remote)
            .cloned()
            .ok_or_else(|| ServiceError::permanent(format!("object not found: {}", remote)))
    }
}

#[async_trait]
impl TransferClient for MemoryBlobService {
    fn fingerprint(&self) -> String {
        self.state.fingerprint.clone()
    }

    async fn head(&self, remote: &str) -> Result<ObjectHead, ServiceError> {
        self.take_fault(FaultPoint::Head)?;
        if let Some(delay) = self.metadata_delay {
            tokio::time::sleep(delay).await;
        }
        let object = self.stored(remote)?;
        Ok(ObjectHead {
            size_bytes: object.data.len() as u64,
            etag: object.sha256.as_ref().map(|h| format!("\"{}\"", &h[..h.len().min(16)])),
            sha256: object.sha256,
        })
    }

    async fn read_range(&self, remote: &str, range: ByteRange) -> Result<ByteStream, ServiceError> {
        self.take_fault(FaultPoint::Read)?;
        let object = self.stored(remote)?;
        if !range.fits(object.data.len() as u64) {
            return Err(ServiceError::permanent(format!(
                "range {} not satisfiable for {} bytes",
                range,
                object.data.len()
            )));
        }
        self.state.reads.fetch_add(1, Ordering::SeqCst);

        let body = object.data.slice(range.start as usize..range.end as usize);
        let chunk_size = self.chunk_size;
        let delay = self.chunk_delay;
        let stream = async_stream::stream! {
            let mut offset = 0;
            while offset < body.len() {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let end = (offset + chunk_size).min(body.len());
                yield Ok::<Bytes, ServiceError>(body.slice(offset..end));
                offset = end;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn write_block(
        &self,
        remote: &str,
        block_id: &BlockId,
        data: Bytes,
    ) -> Result<(), ServiceError> {
        self.take_fault(FaultPoint::Write)?;
        if let Some(delay) = self.chunk_delay {
            tokio::time::sleep(delay).await;
        }
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        self.state
            .staged
            .write()
            .insert((remote.to_string(), block_id.clone()), data);
        Ok(())
    }

    async fn commit_blocks(
        &self,
        remote: &str,
        block_ids: &[BlockId],
    ) -> Result<ObjectHead, ServiceError> {
        self.take_fault(FaultPoint::Commit)?;
        if let Some(delay) = self.metadata_delay {
            tokio::time::sleep(delay).await;
        }

        let mut content = Vec::new();
        {
            let mut staged = self.state.staged.write();
            for block_id in block_ids {
                let key = (remote.to_string(), block_id.clone());
                let data = staged.get(&key).ok_or_else(|| {
                    ServiceError::permanent(format!("block {} was never staged", block_id))
                })?;
                content.extend_from_slice(data);
            }
            staged.retain(|(key, _), _| key != remote);
        }

        self.put_object(remote, content);
        self.head(remote).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn reads_are_chunked_and_ranged() {
        let service = MemoryBlobService::new("acct").with_chunk_size(3);
        service.put_object("k", Bytes::from_static(b"0123456789"));

        let mut stream = service.read_range("k", ByteRange::new(2, 9)).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec![Bytes::from("234"), Bytes::from("567"), Bytes::from("8")]);
    }

    #[tokio::test]
    async fn faults_are_consumed_once() {
        let service = MemoryBlobService::new("acct");
        service.put_object("k", Bytes::from_static(b"abc"));
        service.inject_fault(FaultPoint::Head, ServiceError::transient("throttled"));

        assert!(service.head("k").await.unwrap_err().is_retryable());
        assert_eq!(service.head("k").await.unwrap().size_bytes, 3);
    }

    #[tokio::test]
    async fn commit_assembles_blocks_in_order() {
        let service = MemoryBlobService::new("acct");
        let id = crate::TransferId::from("t");
        let b0 = BlockId::for_block(&id, 0);
        let b1 = BlockId::for_block(&id, 1);
        service.write_block("k", &b1, Bytes::from("world")).await.unwrap();
        service.write_block("k", &b0, Bytes::from("hello ")).await.unwrap();

        let head = service.commit_blocks("k", &[b0, b1]).await.unwrap();
        assert_eq!(head.size_bytes, 11);
        assert_eq!(service.object("k").unwrap(), Bytes::from("hello world"));
        assert_eq!(service.staged_block_count("k"), 0);
    }

    #[tokio::test]
    async fn missing_objects_are_permanent_errors() {
        let service = MemoryBlobService::new("acct");
        let err = service.head("nope").await.unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Permanent);
    }
}
