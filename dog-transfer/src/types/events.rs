use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TransferId, TransferProgress, TransferState};

/// Event protocol broadcast by the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferEvent {
    /// Transfer was added and persisted
    Added {
        id: TransferId,
        owner_id: String,
        at: DateTime<Utc>,
    },

    /// Transfer moved between states
    StateChanged {
        id: TransferId,
        from: TransferState,
        to: TransferState,
        progress: TransferProgress,
        at: DateTime<Utc>,
    },

    /// A block finished and progress moved
    Progress {
        id: TransferId,
        progress: TransferProgress,
        at: DateTime<Utc>,
    },

    /// Transfer completed successfully
    Completed {
        id: TransferId,
        at: DateTime<Utc>,
    },

    /// Transfer failed
    Failed {
        id: TransferId,
        error: String,
        at: DateTime<Utc>,
    },

    /// Transfer was removed from the store
    Removed {
        id: TransferId,
        at: DateTime<Utc>,
    },
}

impl TransferEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::StateChanged { .. } => "state_changed",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Removed { .. } => "removed",
        }
    }

    /// Get the transfer ID from any event
    pub fn transfer_id(&self) -> &TransferId {
        match self {
            Self::Added { id, .. }
            | Self::StateChanged { id, .. }
            | Self::Progress { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. }
            | Self::Removed { id, .. } => id,
        }
    }
}
