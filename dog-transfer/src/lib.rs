//! # dog-transfer: Managed Blob Transfer Engine
//!
//! **Resumable uploads and downloads between a device and remote object storage**
//!
//! dog-transfer turns "move this blob" into a durable record that survives
//! process restarts, network loss and credential expiry:
//!
//! - **Durable records**: every transfer is persisted before it runs, and every
//!   state change is persisted before observers hear about it
//! - **Block I/O**: large blobs are split into fixed-size blocks that run in
//!   parallel and are retried independently
//! - **Bounded concurrency**: a global cap (fixed or following host
//!   parallelism) on transfers in progress, admitted oldest first
//! - **Ownership**: transfers only run through the client registered for
//!   their owner id
//! - **Integrity**: byte counts are enforced and downloads are checked against
//!   the remote SHA-256 when one is published
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dog_transfer::prelude::*;
//!
//! let store = Arc::new(FileTransferStore::open("./transfers").await?);
//! let manager = TransferManager::new(store, TransferConfig::from_env()?)?;
//!
//! manager.register("account-1", Arc::new(my_client)).await?;
//! manager.start_managing().await?;
//!
//! let handle = manager
//!     .add(TransferRequest::download("account-1", "videos/intro.mp4", "./intro.mp4"))
//!     .await?;
//!
//! let mut events = manager.events();
//! while let Ok(event) = events.recv().await {
//!     if event.transfer_id() == &handle.id && event.event_name() == "completed" {
//!         break;
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod manager;
pub mod observer;
pub mod registry;
pub mod store;
pub mod types;
pub mod worker;

// Core API exports
pub use manager::TransferManager;
pub use types::{
    BlockId, ByteRange, Location, PauseReason, TransferEvent, TransferFilter, TransferHandle,
    TransferId, TransferKind, TransferProgress, TransferRecord, TransferRequest, TransferState,
};
pub use error::{ErrorKind, ServiceError, TransferError, TransferResult};
pub use config::{ConcurrencyHint, ConcurrencyLimit, TransferConfig};
pub use client::{ByteStream, MemoryBlobService, ObjectHead, TransferClient};
pub use store::{FileTransferStore, MemoryTransferStore, TransferStore};
pub use connectivity::ConnectivityMonitor;
pub use observer::{ObserverSubscription, TransferObserver};
pub use registry::ClientRegistry;
pub use coordinator::CoordinatorOutcome;
pub use worker::BlockWorker;

#[cfg(feature = "tracing-basic")]
pub use logging::init_tracing;

/// Prelude for applications driving transfers
pub mod prelude {
    pub use crate::{TransferManager, TransferConfig, ConcurrencyLimit, ConnectivityMonitor};

    pub use crate::{
        TransferRequest, TransferHandle, TransferRecord, TransferState, TransferFilter,
        TransferEvent, TransferProgress, PauseReason,
    };

    pub use crate::{TransferError, TransferResult, ServiceError, ErrorKind};

    pub use crate::{TransferClient, TransferStore, TransferObserver, FileTransferStore, MemoryTransferStore};

    pub use async_trait::async_trait;
}
