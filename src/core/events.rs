//! Engine events for observing sync activity
//!
//! Events are fanned out to subscribers and used for:
//! - Notifying UIs of transfer lifecycle and progress
//! - Tracking connectivity transitions
//! - Driving the optional `on_event` callback from the engine config

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Warn when the event channel queue exceeds this many messages.
const BACKPRESSURE_WARNING_THRESHOLD: usize = 192;

/// Events emitted by the sync engine
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Connectivity restored; transfers resume
    Online,

    /// Connectivity lost; no new transfers start
    Offline,

    /// An upload handler began running
    UploadStarted { file_id: String },

    /// Byte-level upload progress
    UploadProgress {
        file_id: String,
        loaded: u64,
        total: u64,
    },

    /// Upload finished and the row now carries the remote key
    UploadCompleted { file_id: String, remote_key: String },

    /// Upload abandoned after retry exhaustion
    UploadFailed { file_id: String, error: String },

    /// A download handler began running
    DownloadStarted { file_id: String },

    /// Byte-level download progress
    DownloadProgress {
        file_id: String,
        loaded: u64,
        total: u64,
    },

    /// Download finished and local bytes verified against the row hash
    DownloadCompleted { file_id: String },

    /// Download abandoned or the downloaded bytes failed verification
    DownloadFailed { file_id: String, error: String },
}

impl SyncEvent {
    /// Wire-style event name for categorization
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::Online => "online",
            SyncEvent::Offline => "offline",
            SyncEvent::UploadStarted { .. } => "upload:start",
            SyncEvent::UploadProgress { .. } => "upload:progress",
            SyncEvent::UploadCompleted { .. } => "upload:complete",
            SyncEvent::UploadFailed { .. } => "upload:error",
            SyncEvent::DownloadStarted { .. } => "download:start",
            SyncEvent::DownloadProgress { .. } => "download:progress",
            SyncEvent::DownloadCompleted { .. } => "download:complete",
            SyncEvent::DownloadFailed { .. } => "download:error",
        }
    }

    /// The file this event concerns, if any
    pub fn file_id(&self) -> Option<&str> {
        match self {
            SyncEvent::Online | SyncEvent::Offline => None,
            SyncEvent::UploadStarted { file_id }
            | SyncEvent::UploadProgress { file_id, .. }
            | SyncEvent::UploadCompleted { file_id, .. }
            | SyncEvent::UploadFailed { file_id, .. }
            | SyncEvent::DownloadStarted { file_id }
            | SyncEvent::DownloadProgress { file_id, .. }
            | SyncEvent::DownloadCompleted { file_id }
            | SyncEvent::DownloadFailed { file_id, .. } => Some(file_id),
        }
    }
}

/// DTO for forwarding engine events to embedding hosts
#[derive(Clone, Debug, Serialize)]
pub struct SyncEventDto {
    /// Event name for routing (`upload:progress`, `online`, ...)
    pub event_type: String,
    /// File the event concerns, when applicable
    pub file_id: Option<String>,
    /// Full event payload as JSON
    pub payload: serde_json::Value,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl SyncEventDto {
    pub fn from_event(event: &SyncEvent) -> Self {
        Self {
            event_type: event.event_type().to_string(),
            file_id: event.file_id().map(str::to_string),
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Callback signature for the engine config's `on_event` option.
pub type EventCallback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Fan-out point for engine events.
///
/// Wraps a broadcast channel with backpressure monitoring and an optional
/// synchronous callback. Dropping all receivers is fine; events are then
/// delivered to the callback only (or discarded).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    callback: Arc<Mutex<Option<EventCallback>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            callback: Arc::new(Mutex::new(None)),
        }
    }

    /// Register (or replace) the configured event callback
    pub fn set_callback(&self, callback: Option<EventCallback>) {
        *self.callback.lock().unwrap_or_else(|e| e.into_inner()) = callback;
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers and the callback
    pub fn emit(&self, event: SyncEvent) {
        let queue_len = self.tx.len();
        if queue_len >= BACKPRESSURE_WARNING_THRESHOLD {
            tracing::warn!(
                queue_length = queue_len,
                threshold = BACKPRESSURE_WARNING_THRESHOLD,
                "Event channel backpressure - consumers may be falling behind"
            );
        }

        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(cb) = callback {
            cb(&event);
        }

        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::trace!(receivers = receivers, "Event delivered");
            }
            Err(_) => {
                tracing::trace!("Event dropped - no active receivers");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
