use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::TransferClient, worker::BlockWorker, BlockId, ByteRange, ServiceError, TransferConfig,
    TransferError, TransferId, TransferKind, TransferRecord, TransferResult,
};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Identifies one admission of a record.
///
/// A record can be admitted again after it was paused; reports carrying an
/// older generation are rejected by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub id: TransferId,
    pub generation: u64,
}

/// One block of a transfer as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBlock {
    pub index: u32,
    pub range: ByteRange,
    /// Already transferred in an earlier run
    pub done: bool,
}

/// How a coordinator run ended
#[derive(Debug, Clone)]
pub enum CoordinatorOutcome {
    /// Every block moved and the result verified
    Completed,
    /// Stopped by pause, cancel or shutdown; nothing to record
    Interrupted,
    Failed(TransferError),
}

/// Answer to a transient failure, carrying the record's retry count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again; this is retry number `n` of the record
    Retry(u32),
    /// The record's retry budget is spent after `n` retries
    Exhausted(u32),
}

/// Receives a coordinator's reports and applies them to the durable record
#[async_trait]
pub trait CoordinatorSink: Send + Sync {
    /// The download probe learned the object's size and hash
    async fn range_resolved(
        &self,
        ticket: &RunTicket,
        range: ByteRange,
        content_hash: Option<String>,
    ) -> TransferResult<()>;

    /// Turn block ranges into planned blocks, creating child records as needed
    async fn blocks_planned(
        &self,
        ticket: &RunTicket,
        blocks: Vec<ByteRange>,
    ) -> TransferResult<Vec<PlannedBlock>>;

    async fn block_completed(&self, ticket: &RunTicket, index: u32, bytes: u64)
        -> TransferResult<()>;

    async fn block_failed(
        &self,
        ticket: &RunTicket,
        index: u32,
        error: &TransferError,
    ) -> TransferResult<()>;

    /// Record a transient failure against the record's retry budget, which
    /// all of its blocks share
    async fn retry_attempted(
        &self,
        ticket: &RunTicket,
        error: &ServiceError,
    ) -> TransferResult<RetryDecision>;
}

/// Drives one admitted transfer: probe, plan, run blocks, then commit or verify
pub struct TransferCoordinator {
    record: TransferRecord,
    ticket: RunTicket,
    client: Arc<dyn TransferClient>,
    sink: Arc<dyn CoordinatorSink>,
    config: TransferConfig,
    parallelism: usize,
    cancel: CancellationToken,
}

impl TransferCoordinator {
    pub fn new(
        record: TransferRecord,
        ticket: RunTicket,
        client: Arc<dyn TransferClient>,
        sink: Arc<dyn CoordinatorSink>,
        config: TransferConfig,
        cancel: CancellationToken,
    ) -> Self {
        let parallelism = config.max_blocks_per_transfer.max(1);
        Self {
            record,
            ticket,
            client,
            sink,
            config,
            parallelism,
            cancel,
        }
    }

    /// Bound block parallelism further (by the current global cap)
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.clamp(1, self.config.max_blocks_per_transfer.max(1));
        self
    }

    pub async fn run(self) -> CoordinatorOutcome {
        let id = self.record.id.clone();
        match self.execute().await {
            Ok(()) => {
                info!("Transfer {} finished all blocks", id);
                CoordinatorOutcome::Completed
            }
            Err(_) if self.cancel.is_cancelled() => {
                debug!("Transfer {} run interrupted", id);
                CoordinatorOutcome::Interrupted
            }
            Err(TransferError::Interrupted) => CoordinatorOutcome::Interrupted,
            Err(e) => {
                warn!("Transfer {} failed: {}", id, e);
                CoordinatorOutcome::Failed(e)
            }
        }
    }

    async fn execute(&self) -> TransferResult<()> {
        let remote = self
            .record
            .remote()
            .ok_or_else(|| TransferError::invalid("transfer has no remote end"))?;
        let local = self
            .record
            .local()
            .ok_or_else(|| TransferError::invalid("transfer has no local end"))?;

        let (range, content_hash) = match self.record.byte_range {
            Some(range) => (range, self.record.content_hash.clone()),
            None => self.probe(remote).await?,
        };

        if self.record.kind == TransferKind::Download {
            prepare_destination(local, range.len()).await?;
        }

        let planned = self
            .sink
            .blocks_planned(&self.ticket, range.split(self.config.block_size))
            .await?;
        let outstanding: Vec<PlannedBlock> = planned.iter().filter(|b| !b.done).copied().collect();
        debug!(
            "Transfer {}: {} blocks planned, {} outstanding, parallelism {}",
            self.record.id,
            planned.len(),
            outstanding.len(),
            self.parallelism
        );

        let worker = BlockWorker::new(self.client.clone(), self.cancel.clone());
        let mut runs = stream::iter(outstanding)
            .map(|block| self.run_block(&worker, remote, local, range, block))
            .buffer_unordered(self.parallelism);
        while let Some(result) = runs.next().await {
            result?;
        }
        drop(runs);

        if self.cancel.is_cancelled() {
            return Err(TransferError::Interrupted);
        }

        match self.record.kind {
            TransferKind::Upload => self.commit(remote, range, planned.len()).await,
            TransferKind::Download => self.verify(local, range, content_hash.as_deref()).await,
        }
    }

    async fn probe(&self, remote: &str) -> TransferResult<(ByteRange, Option<String>)> {
        let head = self.retrying(move || self.client.head(remote)).await?;
        let range = ByteRange::whole(head.size_bytes);
        debug!("Probed {}: {} bytes", remote, head.size_bytes);
        self.sink
            .range_resolved(&self.ticket, range, head.sha256.clone())
            .await?;
        Ok((range, head.sha256))
    }

    async fn run_block(
        &self,
        worker: &BlockWorker,
        remote: &str,
        local: &Path,
        range: ByteRange,
        block: PlannedBlock,
    ) -> TransferResult<()> {
        let block_id = &BlockId::for_block(&self.record.id, block.index);
        let kind = self.record.kind;
        let result = self
            .retrying(move || async move {
                match kind {
                    TransferKind::Download => {
                        worker.download(remote, block.range, range.start, local).await
                    }
                    TransferKind::Upload => {
                        worker.upload(local, remote, block_id, block.range).await
                    }
                }
            })
            .await;

        match result {
            Ok(bytes) => {
                self.sink
                    .block_completed(&self.ticket, block.index, bytes)
                    .await
            }
            Err(TransferError::Interrupted) => Err(TransferError::Interrupted),
            Err(e) => {
                if let Err(report) = self.sink.block_failed(&self.ticket, block.index, &e).await {
                    debug!("Block {} failure not recorded: {}", block.index, report);
                }
                Err(e)
            }
        }
    }

    async fn commit(&self, remote: &str, range: ByteRange, block_count: usize) -> TransferResult<()> {
        let block_ids: Vec<BlockId> = (0..block_count as u32)
            .map(|index| BlockId::for_block(&self.record.id, index))
            .collect();
        let block_ids = block_ids.as_slice();
        let head = self
            .retrying(move || self.client.commit_blocks(remote, block_ids))
            .await?;

        if head.size_bytes != range.len() {
            return Err(TransferError::integrity(format!(
                "committed object {} has {} bytes, expected {}",
                remote,
                head.size_bytes,
                range.len()
            )));
        }
        Ok(())
    }

    async fn verify(&self, local: &Path, range: ByteRange, content_hash: Option<&str>) -> TransferResult<()> {
        let len = tokio::fs::metadata(local).await?.len();
        if len != range.len() {
            return Err(TransferError::integrity(format!(
                "{} has {} bytes, expected {}",
                local.display(),
                len,
                range.len()
            )));
        }

        if let (true, Some(expected)) = (self.config.verify_checksums, content_hash) {
            let actual = sha256_file(local).await?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(TransferError::integrity(format!(
                    "{} has SHA-256 {}, expected {}",
                    local.display(),
                    actual,
                    expected
                )));
            }
            debug!("Verified SHA-256 of {}", local.display());
        }
        Ok(())
    }

    /// Run `op`, retrying transient failures with backoff while the record's
    /// retry budget allows. Every attempt and every backoff stops on cancel.
    async fn retrying<T, F, Fut>(&self, mut op: F) -> TransferResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        loop {
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Interrupted),
                result = op() => result,
            };
            let error = match attempt {
                Ok(value) => return Ok(value),
                Err(e) if e.is_cancelled() => return Err(TransferError::Interrupted),
                Err(e) if !e.is_retryable() => return Err(e.into()),
                Err(e) => e,
            };

            match self.sink.retry_attempted(&self.ticket, &error).await? {
                RetryDecision::Retry(attempt) => {
                    let delay = self.config.retry_backoff(attempt);
                    warn!(
                        "Transfer {} retry {} in {:?}: {}",
                        self.record.id, attempt, delay, error
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(TransferError::Interrupted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Exhausted(retries) => {
                    return Err(TransferError::RetriesExhausted {
                        retries,
                        last_error: error.to_string(),
                    })
                }
            }
        }
    }
}

/// Create the destination without truncating bytes from an earlier run
async fn prepare_destination(path: &Path, len: u64) -> TransferResult<()> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    file.set_len(len).await?;
    Ok(())
}

async fn sha256_file(path: &Path) -> TransferResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{memory::FaultPoint, MemoryBlobService};
    use crate::TransferRequest;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        resolved: Mutex<Option<ByteRange>>,
        completed: Mutex<Vec<u32>>,
        failed: Mutex<Vec<u32>>,
        retries: Mutex<u32>,
        retry_budget: u32,
        skip: Vec<u32>,
    }

    #[async_trait]
    impl CoordinatorSink for RecordingSink {
        async fn range_resolved(
            &self,
            _: &RunTicket,
            range: ByteRange,
            _: Option<String>,
        ) -> TransferResult<()> {
            *self.resolved.lock() = Some(range);
            Ok(())
        }

        async fn blocks_planned(
            &self,
            _: &RunTicket,
            blocks: Vec<ByteRange>,
        ) -> TransferResult<Vec<PlannedBlock>> {
            Ok(blocks
                .into_iter()
                .enumerate()
                .map(|(i, range)| PlannedBlock {
                    index: i as u32,
                    range,
                    done: self.skip.contains(&(i as u32)),
                })
                .collect())
        }

        async fn block_completed(&self, _: &RunTicket, index: u32, _: u64) -> TransferResult<()> {
            self.completed.lock().push(index);
            Ok(())
        }

        async fn block_failed(&self, _: &RunTicket, index: u32, _: &TransferError) -> TransferResult<()> {
            self.failed.lock().push(index);
            Ok(())
        }

        async fn retry_attempted(&self, _: &RunTicket, _: &ServiceError) -> TransferResult<RetryDecision> {
            let mut retries = self.retries.lock();
            if *retries >= self.retry_budget {
                return Ok(RetryDecision::Exhausted(*retries));
            }
            *retries += 1;
            Ok(RetryDecision::Retry(*retries))
        }
    }

    fn config() -> TransferConfig {
        TransferConfig::default()
            .with_block_size(4)
            .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn coordinator(
        record: TransferRecord,
        service: &MemoryBlobService,
        sink: Arc<RecordingSink>,
    ) -> TransferCoordinator {
        let ticket = RunTicket {
            id: record.id.clone(),
            generation: 1,
        };
        TransferCoordinator::new(
            record,
            ticket,
            Arc::new(service.clone()),
            sink,
            config(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn download_probes_and_assembles_blocks() {
        let service = MemoryBlobService::new("acct").with_chunk_size(3);
        service.put_object("k", Bytes::from_static(b"0123456789"));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");

        let record =
            TransferRecord::from_request(TransferRequest::download("acct", "k", &dest), 1);
        let sink = Arc::new(RecordingSink::default());
        let outcome = coordinator(record, &service, sink.clone()).run().await;

        assert!(matches!(outcome, CoordinatorOutcome::Completed));
        assert_eq!(*sink.resolved.lock(), Some(ByteRange::whole(10)));
        let mut completed = sink.completed.lock().clone();
        completed.sort();
        assert_eq!(completed, vec![0, 1, 2]);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn done_blocks_are_skipped() {
        let service = MemoryBlobService::new("acct");
        service.put_object("k", Bytes::from_static(b"0123456789"));
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");

        let record = TransferRecord::from_request(
            TransferRequest::download("acct", "k", &dest).with_range(ByteRange::whole(10)),
            1,
        );
        let sink = Arc::new(RecordingSink {
            skip: vec![0, 2],
            ..Default::default()
        });
        let outcome = coordinator(record, &service, sink.clone()).run().await;

        assert!(matches!(outcome, CoordinatorOutcome::Completed));
        assert_eq!(*sink.completed.lock(), vec![1]);
        assert_eq!(service.read_count(), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let service = MemoryBlobService::new("acct");
        service.put_object("k", Bytes::from_static(b"abc"));
        service.inject_fault(FaultPoint::Read, ServiceError::transient("reset"));
        let dir = tempfile::tempdir().unwrap();

        let record = TransferRecord::from_request(
            TransferRequest::download("acct", "k", dir.path().join("out")),
            1,
        );
        let sink = Arc::new(RecordingSink {
            retry_budget: 3,
            ..Default::default()
        });
        let outcome = coordinator(record, &service, sink.clone()).run().await;

        assert!(matches!(outcome, CoordinatorOutcome::Completed));
        assert_eq!(*sink.retries.lock(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_block() {
        let service = MemoryBlobService::new("acct");
        service.put_object("k", Bytes::from_static(b"abc"));
        for _ in 0..3 {
            service.inject_fault(FaultPoint::Read, ServiceError::transient("reset"));
        }
        let dir = tempfile::tempdir().unwrap();

        let record = TransferRecord::from_request(
            TransferRequest::download("acct", "k", dir.path().join("out")),
            1,
        );
        let sink = Arc::new(RecordingSink {
            retry_budget: 2,
            ..Default::default()
        });
        let outcome = coordinator(record, &service, sink.clone()).run().await;

        assert!(matches!(
            outcome,
            CoordinatorOutcome::Failed(TransferError::RetriesExhausted { retries: 2, .. })
        ));
        assert_eq!(*sink.failed.lock(), vec![0]);
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_download() {
        let service = MemoryBlobService::new("acct");
        service.put_object_with_hash("k", Bytes::from_static(b"abc"), Some("00".repeat(32)));
        let dir = tempfile::tempdir().unwrap();

        let record = TransferRecord::from_request(
            TransferRequest::download("acct", "k", dir.path().join("out")),
            1,
        );
        let outcome = coordinator(record, &service, Arc::new(RecordingSink::default()))
            .run()
            .await;

        assert!(matches!(
            outcome,
            CoordinatorOutcome::Failed(TransferError::Integrity { .. })
        ));
    }

    #[tokio::test]
    async fn upload_commits_blocks_in_order() {
        let service = MemoryBlobService::new("acct");
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in");
        tokio::fs::write(&source, b"hello block world").await.unwrap();

        let record = TransferRecord::from_request(
            TransferRequest::upload("acct", &source, "k").with_range(ByteRange::whole(17)),
            1,
        );
        let outcome = coordinator(record, &service, Arc::new(RecordingSink::default()))
            .run()
            .await;

        assert!(matches!(outcome, CoordinatorOutcome::Completed));
        assert_eq!(service.object("k").unwrap(), Bytes::from("hello block world"));
    }

    #[tokio::test]
    async fn cancelled_run_is_interrupted() {
        let service = MemoryBlobService::new("acct");
        service.put_object("k", Bytes::from_static(b"abc"));
        let dir = tempfile::tempdir().unwrap();
        let record = TransferRecord::from_request(
            TransferRequest::download("acct", "k", dir.path().join("out"))
                .with_range(ByteRange::whole(3)),
            1,
        );
        let ticket = RunTicket {
            id: record.id.clone(),
            generation: 1,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = TransferCoordinator::new(
            record,
            ticket,
            Arc::new(service.clone()),
            Arc::new(RecordingSink::default()),
            config(),
            cancel,
        )
        .run()
        .await;

        assert!(matches!(outcome, CoordinatorOutcome::Interrupted));
        assert_eq!(service.read_count(), 0);
    }

    #[tokio::test]
    async fn cancel_stops_a_pending_metadata_call() {
        let service = MemoryBlobService::new("acct").with_metadata_delay(Duration::from_secs(30));
        service.put_object("k", Bytes::from_static(b"abc"));
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in");
        tokio::fs::write(&source, b"abc").await.unwrap();

        let download = TransferRecord::from_request(
            TransferRequest::download("acct", "k", dir.path().join("out")),
            1,
        );
        let upload = TransferRecord::from_request(
            TransferRequest::upload("acct", &source, "up").with_range(ByteRange::whole(3)),
            2,
        );

        // the download blocks in head, the upload in commit_blocks
        for record in [download, upload] {
            let ticket = RunTicket {
                id: record.id.clone(),
                generation: 1,
            };
            let cancel = CancellationToken::new();
            let run = TransferCoordinator::new(
                record,
                ticket,
                Arc::new(service.clone()),
                Arc::new(RecordingSink::default()),
                config(),
                cancel.clone(),
            )
            .run();
            let trigger = async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            };

            let (outcome, ()) = tokio::time::timeout(Duration::from_secs(5), async {
                tokio::join!(run, trigger)
            })
            .await
            .expect("cancelled run did not stop");
            assert!(matches!(outcome, CoordinatorOutcome::Interrupted));
        }
        assert!(service.object("up").is_none());
    }
}
