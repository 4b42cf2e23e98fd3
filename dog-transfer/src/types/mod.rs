pub mod events;
pub mod ids;
pub mod range;
pub mod record;
pub mod request;

pub use events::TransferEvent;
pub use ids::{BlockId, TransferId};
pub use range::ByteRange;
pub use record::{
    Location, PauseReason, TransferKind, TransferProgress, TransferRecord, TransferState,
};
pub use request::{TransferFilter, TransferHandle, TransferRequest};
