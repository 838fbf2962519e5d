//! Offline-first file synchronization engine
//!
//! Keeps three locations coherent for every file a reactive, event-sourced
//! store knows about: log-derived metadata, content-addressed local blob
//! storage, and a signer-backed remote object store. Mutations land locally
//! first and converge in the background through a bounded-concurrency
//! transfer executor with retry and backoff.
//!
//! Entry point: build a [`sync::SyncInstance`] from a [`store::Store`], a
//! [`fs::FileSystem`], and a [`remote::RemoteStorage`], then `start` it and
//! ingest files through [`sync::FileStorage`].

pub mod config;
pub mod core;
pub mod fs;
pub mod remote;
pub mod storage;
pub mod store;
pub mod sync;
pub mod thumbs;

pub use config::{HashMismatchPolicy, RemoteConfig, SyncOptions, ThumbnailOptions, ThumbnailSize};
pub use self::core::{
    ErrorResponse, EventBus, FileBlob, FileRecord, LocalFileState, SaveFileResult, SyncError,
    SyncEvent, SyncResult, TransferStatus,
};
pub use sync::{PreprocessorMap, SyncInstance, TransferKind};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for binaries and tests embedding the engine.
/// Honors `RUST_LOG`; calling it twice is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,filesync=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
