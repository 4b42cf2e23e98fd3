use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{ByteRange, Location, TransferId, TransferKind, TransferRecord};

/// Caller-side description of a transfer to add
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub(crate) kind: TransferKind,
    pub(crate) source: Location,
    pub(crate) destination: Location,
    pub(crate) owner_id: String,
    pub(crate) byte_range: Option<ByteRange>,
}

impl TransferRequest {
    /// Upload a local file to a remote object
    pub fn upload(
        owner_id: impl Into<String>,
        local: impl Into<PathBuf>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            kind: TransferKind::Upload,
            source: Location::Local(local.into()),
            destination: Location::Remote(remote.into()),
            owner_id: owner_id.into(),
            byte_range: None,
        }
    }

    /// Download a remote object to a local file
    pub fn download(
        owner_id: impl Into<String>,
        remote: impl Into<String>,
        local: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind: TransferKind::Download,
            source: Location::Remote(remote.into()),
            destination: Location::Local(local.into()),
            owner_id: owner_id.into(),
            byte_range: None,
        }
    }

    /// Restrict the transfer to part of the source
    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.byte_range = Some(range);
        self
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

/// Caller's reference to a managed transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferHandle {
    pub id: TransferId,
    pub owner_id: String,
}

impl TransferHandle {
    pub fn new(id: TransferId, owner_id: impl Into<String>) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
        }
    }
}

impl From<&TransferRecord> for TransferHandle {
    fn from(record: &TransferRecord) -> Self {
        Self::new(record.id.clone(), record.owner_id.clone())
    }
}

/// Filter for listing transfers
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub owner_id: Option<String>,
    pub include_blocks: bool,
}

impl TransferFilter {
    /// Every whole transfer, any owner
    pub fn all() -> Self {
        Self::default()
    }

    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            include_blocks: false,
        }
    }

    /// Also list the per-block child records
    pub fn with_blocks(mut self) -> Self {
        self.include_blocks = true;
        self
    }

    pub fn matches(&self, record: &TransferRecord) -> bool {
        if !self.include_blocks && record.is_block() {
            return false;
        }
        match &self.owner_id {
            Some(owner) => &record.owner_id == owner,
            None => true,
        }
    }
}
