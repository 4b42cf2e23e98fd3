use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{ByteRange, TransferId, TransferRequest};
use crate::{TransferError, TransferResult};

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    Upload,
    Download,
}

/// One end of a transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// Object key or URL on the remote service
    Remote(String),
    /// Path on the local filesystem
    Local(PathBuf),
}

impl Location {
    pub fn as_remote(&self) -> Option<&str> {
        match self {
            Self::Remote(key) => Some(key),
            Self::Local(_) => None,
        }
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) => None,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote(key) => write!(f, "remote:{}", key),
            Self::Local(path) => write!(f, "local:{}", path.display()),
        }
    }
}

/// Transfer lifecycle
///
/// ```text
/// Pending ──admit──▶ InProgress ──▶ Complete
///    │  ▲                │  │
///    │  └──resume── Paused ◀┘  └──▶ Failed ──resume──▶ Pending
///    └──────────────▶ Cancelled ◀── (any non-terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    /// Waiting for admission
    Pending,

    /// Admitted and owned by a running coordinator
    InProgress,

    /// Stopped with progress kept
    Paused,

    /// All bytes transferred and verified
    Complete,

    /// Stopped on an unrecoverable error; resumable by the caller
    Failed,

    /// Stopped for good by the caller
    Cancelled,
}

impl TransferState {
    /// Complete and Cancelled never transition further
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Paused)
                | (Pending, Cancelled)
                // block records settle without ever entering InProgress
                | (Pending, Complete)
                | (Pending, Failed)
                | (InProgress, Paused)
                | (InProgress, Complete)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (Paused, Pending)
                | (Paused, Cancelled)
                | (Failed, Pending)
                | (Failed, Cancelled)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why a record sits in `Paused`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PauseReason {
    /// Explicit pause call; only an explicit resume re-queues it
    User,
    /// Network became unreachable
    Connectivity,
    /// Host application went to the background
    Suspended,
    /// Manager stopped, or the process exited mid-transfer
    Shutdown,
}

impl PauseReason {
    /// Pauses the manager lifts on its own once the cause clears.
    ///
    /// User and shutdown pauses wait for an explicit resume.
    pub fn is_automatic(self) -> bool {
        matches!(self, Self::Connectivity | Self::Suspended)
    }
}

/// Snapshot of how far a transfer has got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub bytes: u64,
    pub total: Option<u64>,
}

/// Durable description of one upload or download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub kind: TransferKind,
    pub source: Location,
    pub destination: Location,

    /// Total scope; unknown for a download until the first probe
    pub byte_range: Option<ByteRange>,

    pub state: TransferState,
    pub progress_bytes: u64,

    /// Restoration id of the client allowed to run this transfer
    pub owner_id: String,

    /// Whole-blob record this block belongs to
    pub parent_id: Option<TransferId>,
    pub block_index: Option<u32>,

    pub retry_count: u32,

    /// Admission order key (oldest first)
    pub sequence: u64,

    pub pause_reason: Option<PauseReason>,

    /// Content hash reported by the remote service, hex encoded SHA-256
    pub content_hash: Option<String>,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Create a pending record from a validated request
    pub fn from_request(request: TransferRequest, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::new(),
            kind: request.kind,
            source: request.source,
            destination: request.destination,
            byte_range: request.byte_range,
            state: TransferState::Pending,
            progress_bytes: 0,
            owner_id: request.owner_id,
            parent_id: None,
            block_index: None,
            retry_count: 0,
            sequence,
            pause_reason: None,
            content_hash: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the child record for one block of `parent`
    pub fn new_block(parent: &TransferRecord, index: u32, range: ByteRange) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::new(),
            kind: parent.kind,
            source: parent.source.clone(),
            destination: parent.destination.clone(),
            byte_range: Some(range),
            state: TransferState::Pending,
            progress_bytes: 0,
            owner_id: parent.owner_id.clone(),
            parent_id: Some(parent.id.clone()),
            block_index: Some(index),
            retry_count: 0,
            sequence: parent.sequence,
            pause_reason: None,
            content_hash: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_block(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.byte_range.map(|range| range.len())
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            bytes: self.progress_bytes,
            total: self.total_bytes(),
        }
    }

    /// Remote end of the transfer
    pub fn remote(&self) -> Option<&str> {
        match self.kind {
            TransferKind::Upload => self.destination.as_remote(),
            TransferKind::Download => self.source.as_remote(),
        }
    }

    /// Local end of the transfer
    pub fn local(&self) -> Option<&Path> {
        match self.kind {
            TransferKind::Upload => self.source.as_local(),
            TransferKind::Download => self.destination.as_local(),
        }
    }

    /// Move to `next`, enforcing the state machine
    pub fn transition(&mut self, next: TransferState) -> TransferResult<TransferState> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(TransferError::InvalidTransition {
                id: self.id.clone(),
                from,
                to: next,
            });
        }
        self.state = next;
        if next != TransferState::Paused {
            self.pause_reason = None;
        }
        self.updated_at = Utc::now();
        Ok(from)
    }

    pub fn pause(&mut self, reason: PauseReason) -> TransferResult<TransferState> {
        let from = self.transition(TransferState::Paused)?;
        self.pause_reason = Some(reason);
        Ok(from)
    }

    /// Fail the record, keeping the error for inspection
    pub fn fail(&mut self, error: &TransferError) -> TransferResult<TransferState> {
        let from = self.transition(TransferState::Failed)?;
        self.last_error = Some(error.to_string());
        Ok(from)
    }

    /// Add transferred bytes; never lets progress pass the declared total
    pub fn add_progress(&mut self, bytes: u64) -> TransferResult<u64> {
        let next = self.progress_bytes.saturating_add(bytes);
        if let Some(total) = self.total_bytes() {
            if next > total {
                return Err(TransferError::integrity(format!(
                    "transfer {} would reach {} bytes of {}",
                    self.id, next, total
                )));
            }
        }
        self.progress_bytes = next;
        self.updated_at = Utc::now();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download() -> TransferRecord {
        let request = TransferRequest::download("owner", "bucket/key", "/tmp/out.bin")
            .with_range(ByteRange::whole(100));
        TransferRecord::from_request(request, 1)
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut record = download();
        record.transition(TransferState::InProgress).unwrap();
        record.transition(TransferState::Complete).unwrap();

        for next in [
            TransferState::Pending,
            TransferState::InProgress,
            TransferState::Paused,
            TransferState::Failed,
            TransferState::Cancelled,
        ] {
            assert!(record.transition(next).is_err());
        }
        assert_eq!(record.state, TransferState::Complete);
    }

    #[test]
    fn resume_goes_through_pending() {
        let mut record = download();
        record.transition(TransferState::InProgress).unwrap();
        record.pause(PauseReason::User).unwrap();
        assert_eq!(record.pause_reason, Some(PauseReason::User));

        assert!(record.transition(TransferState::InProgress).is_err());
        record.transition(TransferState::Pending).unwrap();
        assert_eq!(record.pause_reason, None);
    }

    #[test]
    fn progress_cannot_exceed_total() {
        let mut record = download();
        record.add_progress(60).unwrap();
        assert!(record.add_progress(41).is_err());
        assert_eq!(record.progress_bytes, 60);
        assert_eq!(record.add_progress(40).unwrap(), 100);
    }

    #[test]
    fn blocks_inherit_owner_and_direction() {
        let parent = download();
        let block = TransferRecord::new_block(&parent, 2, ByteRange::new(40, 60));
        assert_eq!(block.owner_id, parent.owner_id);
        assert_eq!(block.parent_id.as_ref(), Some(&parent.id));
        assert_eq!(block.block_index, Some(2));
        assert_eq!(block.remote(), Some("bucket/key"));
        assert!(block.is_block());
    }
}
