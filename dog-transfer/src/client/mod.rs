pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;

use crate::{BlockId, ByteRange, ServiceError};

pub use memory::MemoryBlobService;

/// Stream of bytes read from the remote service
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ServiceError>> + Send>>;

/// Metadata about a remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size_bytes: u64,
    pub etag: Option<String>,
    /// Hex encoded SHA-256 of the content, when the service knows it
    pub sha256: Option<String>,
}

/// Authenticated access to the remote object service for one owner.
///
/// Implementations build and sign the actual requests; the engine only sees
/// classified [`ServiceError`]s. Transport timeouts must be reported as
/// `ErrorKind::Transient`.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Identity of the client configuration (account, endpoint, ...).
    ///
    /// Two clients with the same fingerprint may replace each other under an
    /// owner id; different fingerprints conflict.
    fn fingerprint(&self) -> String;

    /// Fetch object metadata
    async fn head(&self, remote: &str) -> Result<ObjectHead, ServiceError>;

    /// Read a byte range of an object
    async fn read_range(&self, remote: &str, range: ByteRange) -> Result<ByteStream, ServiceError>;

    /// Stage one block of an upload
    async fn write_block(
        &self,
        remote: &str,
        block_id: &BlockId,
        data: Bytes,
    ) -> Result<(), ServiceError>;

    /// Commit staged blocks, in order, as the object's content
    async fn commit_blocks(
        &self,
        remote: &str,
        block_ids: &[BlockId],
    ) -> Result<ObjectHead, ServiceError>;
}
