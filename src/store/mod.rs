//! Store contract
//!
//! The reactive, event-sourced client database is an external collaborator;
//! the engine consumes it through this trait: `query` reads materialized
//! state, `commit` appends an event, `subscribe` delivers change pokes.
//! [`memory::MemoryStore`] is the in-process implementation used by tests
//! and demos.

pub mod event;
pub mod memory;

use crate::core::{FileRecord, SyncError, SyncResult};
use crate::thumbs::state::ThumbnailStateDoc;
use async_trait::async_trait;
use tokio::sync::broadcast;

pub use event::{LocalFileStateDoc, StoreEvent};
pub use memory::MemoryStore;

/// Typed queries the engine issues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    /// Non-deleted rows of the `files` table.
    ActiveFiles,
    /// All rows including tombstones.
    AllFiles,
    /// One row by id, tombstoned or not.
    FileById(String),
    /// The `localFileState` per-session document.
    LocalFileState,
    /// The `thumbnailState` per-session document.
    ThumbnailState,
}

/// Results matching [`Query`] variants one to one.
#[derive(Clone, Debug)]
pub enum QueryResult {
    Files(Vec<FileRecord>),
    File(Option<FileRecord>),
    LocalFileState(LocalFileStateDoc),
    ThumbnailState(ThumbnailStateDoc),
}

/// Change poke delivered to subscribers.
#[derive(Clone, Debug)]
pub struct StoreChange {
    /// Name of the event that caused the change.
    pub event: String,
}

/// Names a store implementation must expose for the engine to start.
#[derive(Clone, Debug, Default)]
pub struct StoreSchema {
    pub tables: Vec<String>,
    pub documents: Vec<String>,
    pub events: Vec<String>,
}

impl StoreSchema {
    /// Entities the sync engine requires.
    pub const REQUIRED_TABLES: &'static [&'static str] = &["files"];
    pub const REQUIRED_DOCUMENTS: &'static [&'static str] = &["localFileState"];
    pub const REQUIRED_EVENTS: &'static [&'static str] = &[
        "v1.FileCreated",
        "v1.FileUpdated",
        "v1.FileDeleted",
        "localFileStateSet",
    ];

    /// Validate that the schema covers everything the engine commits and
    /// queries. Returns the first missing entity.
    pub fn validate_for_sync(&self) -> SyncResult<()> {
        for table in Self::REQUIRED_TABLES {
            if !self.tables.iter().any(|t| t == table) {
                return Err(SyncError::SchemaMismatch {
                    missing: format!("table '{table}'"),
                });
            }
        }
        for doc in Self::REQUIRED_DOCUMENTS {
            if !self.documents.iter().any(|d| d == doc) {
                return Err(SyncError::SchemaMismatch {
                    missing: format!("document '{doc}'"),
                });
            }
        }
        for event in Self::REQUIRED_EVENTS {
            if !self.events.iter().any(|e| e == event) {
                return Err(SyncError::SchemaMismatch {
                    missing: format!("event '{event}'"),
                });
            }
        }
        Ok(())
    }
}

/// The reactive store surface the engine consumes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Schema exposed for startup validation.
    fn schema(&self) -> StoreSchema;

    /// Read materialized state.
    async fn query(&self, query: Query) -> SyncResult<QueryResult>;

    /// Append an event; the store serializes commits (single writer).
    async fn commit(&self, event: StoreEvent) -> SyncResult<()>;

    /// Change pokes for the entity the query addresses. File queries share
    /// one channel; document queries another.
    fn subscribe(&self, query: Query) -> broadcast::Receiver<StoreChange>;
}

/// Typed convenience readers over the `query` surface.
#[async_trait]
pub trait StoreExt: Store {
    async fn active_files(&self) -> SyncResult<Vec<FileRecord>> {
        match self.query(Query::ActiveFiles).await? {
            QueryResult::Files(files) => Ok(files),
            other => Err(unexpected(&other)),
        }
    }

    async fn all_files(&self) -> SyncResult<Vec<FileRecord>> {
        match self.query(Query::AllFiles).await? {
            QueryResult::Files(files) => Ok(files),
            other => Err(unexpected(&other)),
        }
    }

    async fn file_by_id(&self, id: &str) -> SyncResult<Option<FileRecord>> {
        match self.query(Query::FileById(id.to_string())).await? {
            QueryResult::File(record) => Ok(record),
            other => Err(unexpected(&other)),
        }
    }

    async fn local_file_state(&self) -> SyncResult<LocalFileStateDoc> {
        match self.query(Query::LocalFileState).await? {
            QueryResult::LocalFileState(doc) => Ok(doc),
            other => Err(unexpected(&other)),
        }
    }

    async fn thumbnail_state(&self) -> SyncResult<ThumbnailStateDoc> {
        match self.query(Query::ThumbnailState).await? {
            QueryResult::ThumbnailState(doc) => Ok(doc),
            other => Err(unexpected(&other)),
        }
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

fn unexpected(result: &QueryResult) -> SyncError {
    SyncError::Store(format!("unexpected query result shape: {result:?}"))
}
