pub mod pipeline;
pub mod state;
pub mod worker;

pub use pipeline::{config_hash, mime_from_bytes, ThumbnailPipeline};
pub use state::{FileThumbnailState, ThumbnailSizeState, ThumbnailStateDoc, ThumbnailStatus};
pub use worker::{ThumbnailArtifact, ThumbnailCodec, ThumbnailWorker};
