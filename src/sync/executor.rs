//! Transfer executor
//!
//! Bounded-concurrency scheduler for upload and download intents. A single
//! processing loop takes work items, respecting separate per-kind caps, and
//! drives each through an injected handler with jittered exponential
//! backoff. Intents are deduplicated by `(kind, file_id)` across queued and
//! in-flight work, including backoff sleeps.

use crate::core::{SyncError, SyncResult};
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Direction of a transfer intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferKind {
    Upload,
    Download,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Upload => "upload",
            TransferKind::Download => "download",
        }
    }
}

/// The work seam: runs one transfer attempt, and is told when an intent is
/// abandoned after retry exhaustion so it can record the terminal error.
#[async_trait]
pub trait TransferHandler: Send + Sync {
    async fn run(&self, kind: TransferKind, file_id: &str) -> SyncResult<()>;

    async fn on_abandoned(&self, kind: TransferKind, file_id: &str, error: &SyncError);
}

/// Read-side seam for `retry_errors`: which transfers currently sit in a
/// terminal error state.
#[async_trait]
pub trait TransferStateView: Send + Sync {
    async fn errored_transfers(&self) -> Vec<(TransferKind, String)>;
}

/// Executor tuning, usually derived from [`crate::config::SyncOptions`].
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub max_concurrent_downloads: usize,
    pub max_concurrent_uploads: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_retries: u32,
}

impl From<&crate::config::SyncOptions> for ExecutorConfig {
    fn from(options: &crate::config::SyncOptions) -> Self {
        Self {
            max_concurrent_downloads: options.max_concurrent_downloads,
            max_concurrent_uploads: options.max_concurrent_uploads,
            base_delay_ms: options.base_delay_ms,
            max_delay_ms: options.max_delay_ms,
            jitter_ms: options.jitter_ms,
            max_retries: options.max_retries,
        }
    }
}

/// Backoff before retry `attempt` (0-based):
/// `min(max_delay, base * 2^attempt) + uniform[0, jitter)`.
fn backoff_delay(config: &ExecutorConfig, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let exponential = config
        .base_delay_ms
        .saturating_mul(factor)
        .min(config.max_delay_ms);
    let jitter = if config.jitter_ms > 0 {
        rand::thread_rng().gen_range(0..config.jitter_ms)
    } else {
        0
    };
    Duration::from_millis(exponential + jitter)
}

#[derive(Default)]
struct Queues {
    uploads: VecDeque<String>,
    downloads: VecDeque<String>,
    /// Dedup set covering queued and in-flight work (backoff included).
    active: HashSet<(TransferKind, String)>,
    inflight_uploads: usize,
    inflight_downloads: usize,
    paused: bool,
}

impl Queues {
    fn queue_mut(&mut self, kind: TransferKind) -> &mut VecDeque<String> {
        match kind {
            TransferKind::Upload => &mut self.uploads,
            TransferKind::Download => &mut self.downloads,
        }
    }

    fn queued_count(&self) -> usize {
        self.uploads.len() + self.downloads.len()
    }

    fn inflight_count(&self) -> usize {
        self.inflight_uploads + self.inflight_downloads
    }

    fn is_idle(&self) -> bool {
        self.queued_count() == 0 && self.inflight_count() == 0
    }
}

pub struct SyncExecutor {
    config: ExecutorConfig,
    handler: Arc<dyn TransferHandler>,
    state_view: Arc<dyn TransferStateView>,
    queues: Mutex<Queues>,
    wake: Notify,
    idle: Notify,
    cancel: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl SyncExecutor {
    pub fn new(
        config: ExecutorConfig,
        handler: Arc<dyn TransferHandler>,
        state_view: Arc<dyn TransferStateView>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler,
            state_view,
            queues: Mutex::new(Queues::default()),
            wake: Notify::new(),
            idle: Notify::new(),
            cancel: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn the processing loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();

        let executor = self.clone();
        tokio::spawn(async move {
            tracing::debug!("Executor loop started");
            loop {
                let launchable = executor.collect_launchable();
                for (kind, file_id) in launchable {
                    executor.spawn_worker(kind, file_id, token.clone());
                }

                tokio::select! {
                    _ = executor.wake.notified() => {}
                    _ = token.cancelled() => break,
                }
            }
            tracing::debug!("Executor loop stopped");
        });
    }

    /// Interrupt the processing loop and cancel pending backoff sleeps.
    /// In-flight handler invocations run to completion. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    /// Enqueue a download intent; a no-op while the same intent is queued
    /// or in flight. Returns whether the intent was accepted.
    pub fn enqueue_download(&self, file_id: impl Into<String>) -> bool {
        self.enqueue(TransferKind::Download, file_id.into())
    }

    /// Enqueue an upload intent; dedup as for downloads.
    pub fn enqueue_upload(&self, file_id: impl Into<String>) -> bool {
        self.enqueue(TransferKind::Upload, file_id.into())
    }

    fn enqueue(&self, kind: TransferKind, file_id: String) -> bool {
        {
            let mut queues = self.lock();
            let dedup_key = (kind, file_id.clone());
            if queues.active.contains(&dedup_key) {
                tracing::trace!(kind = kind.as_str(), file_id = %file_id, "Intent deduplicated");
                return false;
            }
            queues.active.insert(dedup_key);
            queues.queue_mut(kind).push_back(file_id);
        }
        self.wake.notify_one();
        true
    }

    /// Stop starting new tasks; in-flight tasks run to completion.
    pub fn pause(&self) {
        self.lock().paused = true;
        tracing::debug!("Executor paused");
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        self.wake.notify_one();
        tracing::debug!("Executor resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn inflight_count(&self) -> usize {
        self.lock().inflight_count()
    }

    pub fn queued_count(&self) -> usize {
        self.lock().queued_count()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Resolve once the queues are empty and nothing is in flight.
    pub async fn await_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking, so a notify between the check and
            // the await is not lost.
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Move a file id to the head of its queue(s).
    pub fn prioritize(&self, file_id: &str) {
        let mut queues = self.lock();
        for kind in [TransferKind::Download, TransferKind::Upload] {
            let queue = queues.queue_mut(kind);
            if let Some(pos) = queue.iter().position(|id| id == file_id) {
                if pos > 0 {
                    if let Some(id) = queue.remove(pos) {
                        queue.push_front(id);
                    }
                }
            }
        }
    }

    /// Re-enqueue every transfer whose per-session state shows a terminal
    /// error status.
    pub async fn retry_errors(&self) -> usize {
        let errored = self.state_view.errored_transfers().await;
        let mut requeued = 0;
        for (kind, file_id) in errored {
            if self.enqueue(kind, file_id) {
                requeued += 1;
            }
        }
        if requeued > 0 {
            tracing::info!(count = requeued, "Re-enqueued errored transfers");
        }
        requeued
    }

    /// Pop every item that may start right now, marking it in flight.
    fn collect_launchable(&self) -> Vec<(TransferKind, String)> {
        let mut queues = self.lock();
        if queues.paused {
            return Vec::new();
        }

        let mut launchable = Vec::new();
        while queues.inflight_downloads < self.config.max_concurrent_downloads {
            match queues.downloads.pop_front() {
                Some(id) => {
                    queues.inflight_downloads += 1;
                    launchable.push((TransferKind::Download, id));
                }
                None => break,
            }
        }
        while queues.inflight_uploads < self.config.max_concurrent_uploads {
            match queues.uploads.pop_front() {
                Some(id) => {
                    queues.inflight_uploads += 1;
                    launchable.push((TransferKind::Upload, id));
                }
                None => break,
            }
        }
        launchable
    }

    fn spawn_worker(self: &Arc<Self>, kind: TransferKind, file_id: String, token: CancellationToken) {
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run_intent(kind, &file_id, token).await;
            executor.finish_intent(kind, &file_id);
        });
    }

    /// Drive one intent to a terminal outcome: success, abandonment after
    /// `max_retries + 1` attempts, or interruption during backoff.
    async fn run_intent(&self, kind: TransferKind, file_id: &str, token: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            match self.handler.run(kind, file_id).await {
                Ok(()) => {
                    tracing::debug!(
                        kind = kind.as_str(),
                        file_id = %file_id,
                        attempt = attempt,
                        "Transfer succeeded"
                    );
                    return;
                }
                Err(error) => {
                    if attempt >= self.config.max_retries {
                        tracing::warn!(
                            kind = kind.as_str(),
                            file_id = %file_id,
                            attempts = attempt + 1,
                            error = %error,
                            "Transfer abandoned after retry exhaustion"
                        );
                        self.handler.on_abandoned(kind, file_id, &error).await;
                        return;
                    }

                    let delay = backoff_delay(&self.config, attempt);
                    tracing::debug!(
                        kind = kind.as_str(),
                        file_id = %file_id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transfer failed, backing off"
                    );
                    attempt += 1;

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {
                            tracing::debug!(
                                kind = kind.as_str(),
                                file_id = %file_id,
                                "Backoff interrupted by stop"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }

    fn finish_intent(&self, kind: TransferKind, file_id: &str) {
        let became_idle = {
            let mut queues = self.lock();
            match kind {
                TransferKind::Upload => queues.inflight_uploads -= 1,
                TransferKind::Download => queues.inflight_downloads -= 1,
            }
            queues.active.remove(&(kind, file_id.to_string()));
            queues.is_idle()
        };
        self.wake.notify_one();
        if became_idle {
            self.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        runs: AtomicUsize,
        abandoned: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingHandler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                abandoned: AtomicUsize::new(0),
                fail: AtomicBool::new(fail),
            })
        }
    }

    #[async_trait]
    impl TransferHandler for CountingHandler {
        async fn run(&self, _kind: TransferKind, file_id: &str) -> SyncResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(SyncError::Upload {
                    key: file_id.to_string(),
                    cause: "always fails".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn on_abandoned(&self, _kind: TransferKind, _file_id: &str, _error: &SyncError) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct EmptyStateView;

    #[async_trait]
    impl TransferStateView for EmptyStateView {
        async fn errored_transfers(&self) -> Vec<(TransferKind, String)> {
            Vec::new()
        }
    }

    fn config(max_retries: u32) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrent_downloads: 2,
            max_concurrent_uploads: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_ms: 1,
            max_retries,
        }
    }

    #[test]
    fn test_backoff_delay_growth_and_cap() {
        let config = ExecutorConfig {
            max_concurrent_downloads: 1,
            max_concurrent_uploads: 1,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_ms: 0,
            max_retries: 10,
        };
        assert_eq!(backoff_delay(&config, 0).as_millis(), 100);
        assert_eq!(backoff_delay(&config, 1).as_millis(), 200);
        assert_eq!(backoff_delay(&config, 2).as_millis(), 400);
        assert_eq!(backoff_delay(&config, 5).as_millis(), 1000);
        // Huge attempts do not overflow
        assert_eq!(backoff_delay(&config, 200).as_millis(), 1000);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let config = ExecutorConfig {
            max_concurrent_downloads: 1,
            max_concurrent_uploads: 1,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter_ms: 20,
            max_retries: 1,
        };
        for _ in 0..50 {
            let delay = backoff_delay(&config, 0).as_millis() as u64;
            assert!((10..30).contains(&delay));
        }
    }

    #[tokio::test]
    async fn test_dedup_single_invocation() {
        let handler = CountingHandler::new(false);
        let executor = SyncExecutor::new(config(0), handler.clone(), Arc::new(EmptyStateView));

        // Enqueue the same intent repeatedly before starting the loop
        assert!(executor.enqueue_upload("f1"));
        for _ in 0..4 {
            assert!(!executor.enqueue_upload("f1"));
        }
        assert_eq!(executor.queued_count(), 1);

        executor.start();
        executor.await_idle().await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);

        // A new enqueue after the terminal outcome is accepted
        assert!(executor.enqueue_upload("f1"));
        executor.await_idle().await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 2);
        executor.stop();
    }

    #[tokio::test]
    async fn test_retry_bound() {
        let handler = CountingHandler::new(true);
        let executor = SyncExecutor::new(config(2), handler.clone(), Arc::new(EmptyStateView));
        executor.start();
        executor.enqueue_upload("f1");
        executor.await_idle().await;

        assert_eq!(handler.runs.load(Ordering::SeqCst), 3);
        assert_eq!(handler.abandoned.load(Ordering::SeqCst), 1);
        executor.stop();
    }

    #[tokio::test]
    async fn test_pause_holds_queue() {
        let handler = CountingHandler::new(false);
        let executor = SyncExecutor::new(config(0), handler.clone(), Arc::new(EmptyStateView));
        executor.start();
        executor.pause();
        assert!(executor.is_paused());

        executor.enqueue_download("f1");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 0);
        assert_eq!(executor.queued_count(), 1);

        executor.resume();
        executor.await_idle().await;
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        executor.stop();
    }

    #[tokio::test]
    async fn test_prioritize_reheads_queue() {
        let handler = CountingHandler::new(false);
        let executor = SyncExecutor::new(config(0), handler, Arc::new(EmptyStateView));
        executor.enqueue_download("a");
        executor.enqueue_download("b");
        executor.enqueue_download("c");
        executor.prioritize("c");

        let mut queues = executor.lock();
        let order: Vec<_> = queues.queue_mut(TransferKind::Download).iter().cloned().collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
