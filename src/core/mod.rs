pub mod error;
pub mod events;
pub mod file;
pub mod paths;

pub use error::{ErrorResponse, SyncError, SyncResult};
pub use events::{EventBus, EventCallback, SyncEvent, SyncEventDto};
pub use file::{
    now_millis, sha256_hex, FileBlob, FileRecord, LocalFileState, SaveFileResult, TransferStatus,
};
