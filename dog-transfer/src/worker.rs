use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::{client::TransferClient, BlockId, ByteRange, ServiceError};

/// Executes one block of I/O against the remote service.
///
/// Workers never touch transfer records. They return the number of bytes
/// moved or a classified [`ServiceError`], and stop with
/// `ErrorKind::Cancelled` as soon as their token fires.
#[derive(Clone)]
pub struct BlockWorker {
    client: Arc<dyn TransferClient>,
    cancel: CancellationToken,
}

impl BlockWorker {
    pub fn new(client: Arc<dyn TransferClient>, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    /// Stream `block` of `remote` into `destination` at `block.start - base`.
    ///
    /// The destination file must already exist. Cancellation is checked
    /// between chunks; a partial block is rewritten from its start next time.
    pub async fn download(
        &self,
        remote: &str,
        block: ByteRange,
        base: u64,
        destination: &Path,
    ) -> Result<u64, ServiceError> {
        if self.cancel.is_cancelled() {
            return Err(ServiceError::cancelled());
        }

        let expected = block.len();
        let mut stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ServiceError::cancelled()),
            stream = self.client.read_range(remote, block) => stream?,
        };

        let mut file = OpenOptions::new().write(true).open(destination).await?;
        file.seek(SeekFrom::Start(block.start - base)).await?;

        let mut written = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ServiceError::cancelled()),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            if written + chunk.len() as u64 > expected {
                return Err(ServiceError::integrity(format!(
                    "block {} of {} returned more than {} bytes",
                    block, remote, expected
                )));
            }
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        if written < expected {
            return Err(ServiceError::transient(format!(
                "block {} of {} ended after {} of {} bytes",
                block, remote, written, expected
            )));
        }

        file.flush().await?;
        file.sync_data().await?;
        trace!("Downloaded block {} of {} ({} bytes)", block, remote, written);
        Ok(written)
    }

    /// Read `block` of `source` and stage it under `block_id`
    pub async fn upload(
        &self,
        source: &Path,
        remote: &str,
        block_id: &BlockId,
        block: ByteRange,
    ) -> Result<u64, ServiceError> {
        if self.cancel.is_cancelled() {
            return Err(ServiceError::cancelled());
        }

        let data = read_block(source, block).await?;
        let len = data.len() as u64;

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ServiceError::cancelled()),
            result = self.client.write_block(remote, block_id, data) => {
                result?;
                trace!("Staged block {} for {} ({} bytes)", block_id, remote, len);
                Ok(len)
            }
        }
    }
}

async fn read_block(source: &Path, block: ByteRange) -> Result<Bytes, ServiceError> {
    let mut file = File::open(source).await?;
    file.seek(SeekFrom::Start(block.start)).await?;

    let mut buffer = vec![0u8; block.len() as usize];
    match file.read_exact(&mut buffer).await {
        Ok(_) => Ok(Bytes::from(buffer)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ServiceError::integrity(format!(
                "{} is shorter than block {}",
                source.display(),
                block
            )))
        }
        Err(e) => Err(e.into()),
    }
}
