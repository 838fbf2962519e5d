//! Thumbnail worker host
//!
//! Runs the image codec on a dedicated thread and talks to it by message
//! passing: request buffers move into the worker (no copies, no shared
//! state), replies come back over per-request oneshot channels. Requests
//! carry a monotonically increasing id and are dropped on timeout; a late
//! reply to a timed-out request goes nowhere.

use crate::config::ThumbnailSize;
use crate::core::{SyncError, SyncResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// One derived image produced by the codec.
#[derive(Clone, Debug)]
pub struct ThumbnailArtifact {
    pub size_name: String,
    pub format: String,
    pub bytes: Vec<u8>,
}

/// The image codec seam. Implementations decode, resize, and encode; the
/// engine never interprets image bytes itself.
///
/// A codec may omit a requested size from its result (e.g. when the source
/// is already smaller than the target); the pipeline records such sizes as
/// skipped.
pub trait ThumbnailCodec: Send + 'static {
    /// One-time initialization, run on the worker thread before the first
    /// request.
    fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn generate(
        &mut self,
        bytes: Vec<u8>,
        mime_type: &str,
        sizes: &[ThumbnailSize],
        format: &str,
    ) -> Result<Vec<ThumbnailArtifact>, String>;
}

struct WorkerRequest {
    id: u64,
    bytes: Vec<u8>,
    mime_type: String,
    sizes: Vec<ThumbnailSize>,
    format: String,
    reply: oneshot::Sender<Result<Vec<ThumbnailArtifact>, String>>,
}

pub struct ThumbnailWorker {
    tx: Mutex<Option<std::sync::mpsc::Sender<WorkerRequest>>>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    next_request_id: AtomicU64,
    timeout: Duration,
}

impl std::fmt::Debug for ThumbnailWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailWorker")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ThumbnailWorker {
    /// Spawn the worker thread and initialize the codec on it. Fails when
    /// codec initialization fails.
    pub fn spawn(mut codec: Box<dyn ThumbnailCodec>, timeout: Duration) -> SyncResult<Self> {
        let (tx, rx) = std::sync::mpsc::channel::<WorkerRequest>();
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        let handle = std::thread::Builder::new()
            .name("thumbnail-worker".to_string())
            .spawn(move || {
                if let Err(error) = codec.init() {
                    let _ = init_tx.send(Err(error));
                    return;
                }
                let _ = init_tx.send(Ok(()));

                while let Ok(request) = rx.recv() {
                    tracing::trace!(request_id = request.id, "Worker request received");
                    let result = codec.generate(
                        request.bytes,
                        &request.mime_type,
                        &request.sizes,
                        &request.format,
                    );
                    // The receiver may have timed out; a failed send is fine.
                    let _ = request.reply.send(result);
                }
                tracing::debug!("Thumbnail worker thread exiting");
            })
            .map_err(|e| SyncError::WorkerCommunication(format!("spawn failed: {e}")))?;

        match init_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                let _ = handle.join();
                return Err(SyncError::ThumbnailGeneration(format!(
                    "codec initialization failed: {error}"
                )));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(SyncError::WorkerCommunication(
                    "worker exited before initialization".to_string(),
                ));
            }
        }

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            next_request_id: AtomicU64::new(1),
            timeout,
        })
    }

    /// Dispatch one generation request; resolves with the artifacts, a
    /// codec error, or a timeout after the configured deadline.
    pub async fn generate(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        sizes: &[ThumbnailSize],
        format: &str,
    ) -> SyncResult<Vec<ThumbnailArtifact>> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            let Some(tx) = tx.as_ref() else {
                return Err(SyncError::WorkerCommunication(
                    "worker is shut down".to_string(),
                ));
            };
            tx.send(WorkerRequest {
                id,
                bytes,
                mime_type: mime_type.to_string(),
                sizes: sizes.to_vec(),
                format: format.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| SyncError::WorkerCommunication("worker thread is gone".to_string()))?;
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Err(_) => Err(SyncError::WorkerTimeout {
                request_id: id,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Ok(Err(_)) => Err(SyncError::WorkerCommunication(
                "worker dropped the reply".to_string(),
            )),
            Ok(Ok(Ok(artifacts))) => Ok(artifacts),
            Ok(Ok(Err(error))) => Err(SyncError::ThumbnailGeneration(error)),
        }
    }

    /// Terminate the worker: close the channel and join the thread.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ThumbnailWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
