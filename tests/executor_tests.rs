//! Executor scheduling properties: dedup, retry bounds, concurrency caps,
//! pause semantics, idle detection, and stop interrupting backoff.

use async_trait::async_trait;
use filesync::core::{SyncError, SyncResult};
use filesync::sync::{ExecutorConfig, SyncExecutor, TransferHandler, TransferKind, TransferStateView};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

struct RecordingHandler {
    runs: AtomicUsize,
    abandoned: AtomicUsize,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    fail: AtomicBool,
    hold: AtomicBool,
    released: Notify,
    run_log: Mutex<Vec<(TransferKind, String)>>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            released: Notify::new(),
            run_log: Mutex::new(Vec::new()),
        })
    }

    fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }
}

#[async_trait]
impl TransferHandler for RecordingHandler {
    async fn run(&self, kind: TransferKind, file_id: &str) -> SyncResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.run_log
            .lock()
            .unwrap()
            .push((kind, file_id.to_string()));

        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.hold.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(SyncError::Download {
                key: file_id.to_string(),
                cause: "injected".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn on_abandoned(&self, _kind: TransferKind, _file_id: &str, _error: &SyncError) {
        self.abandoned.fetch_add(1, Ordering::SeqCst);
    }
}

struct StaticStateView(Mutex<HashMap<String, TransferKind>>);

#[async_trait]
impl TransferStateView for StaticStateView {
    async fn errored_transfers(&self) -> Vec<(TransferKind, String)> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|(id, kind)| (*kind, id.clone()))
            .collect()
    }
}

fn empty_view() -> Arc<StaticStateView> {
    Arc::new(StaticStateView(Mutex::new(HashMap::new())))
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrent_downloads: 2,
        max_concurrent_uploads: 2,
        base_delay_ms: 2,
        max_delay_ms: 10,
        jitter_ms: 2,
        max_retries: 3,
    }
}

#[tokio::test]
async fn test_dedup_while_inflight() {
    let handler = RecordingHandler::new();
    handler.hold.store(true, Ordering::SeqCst);
    let executor = SyncExecutor::new(config(), handler.clone(), empty_view());
    executor.start();

    executor.enqueue_download("f1");
    // Give the loop time to move the intent in flight
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(executor.inflight_count(), 1);

    // Re-enqueueing while in flight is a no-op
    for _ in 0..5 {
        assert!(!executor.enqueue_download("f1"));
    }
    assert_eq!(executor.queued_count(), 0);

    handler.release();
    executor.await_idle().await;
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);

    executor.stop();
}

#[tokio::test]
async fn test_uploads_and_downloads_are_independent() {
    let handler = RecordingHandler::new();
    let executor = SyncExecutor::new(config(), handler.clone(), empty_view());
    executor.start();

    // The same file id may hold one intent per kind
    assert!(executor.enqueue_download("f1"));
    assert!(executor.enqueue_upload("f1"));
    executor.await_idle().await;

    let log = handler.run_log.lock().unwrap().clone();
    assert_eq!(log.len(), 2);
    assert!(log.contains(&(TransferKind::Download, "f1".to_string())));
    assert!(log.contains(&(TransferKind::Upload, "f1".to_string())));

    executor.stop();
}

#[tokio::test]
async fn test_concurrency_cap_respected() {
    let handler = RecordingHandler::new();
    handler.hold.store(true, Ordering::SeqCst);
    let executor = SyncExecutor::new(
        ExecutorConfig {
            max_concurrent_downloads: 2,
            max_concurrent_uploads: 2,
            ..config()
        },
        handler.clone(),
        empty_view(),
    );
    executor.start();

    for i in 0..6 {
        executor.enqueue_download(format!("f{i}"));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Only the cap's worth of intents run; the rest stay queued
    assert_eq!(executor.inflight_count(), 2);
    assert_eq!(executor.queued_count(), 4);

    handler.release();
    executor.await_idle().await;
    assert_eq!(handler.runs.load(Ordering::SeqCst), 6);
    assert!(handler.max_concurrent.load(Ordering::SeqCst) <= 2);

    executor.stop();
}

#[tokio::test]
async fn test_retry_bound_per_enqueue() {
    let handler = RecordingHandler::new();
    handler.fail.store(true, Ordering::SeqCst);
    let executor = SyncExecutor::new(
        ExecutorConfig {
            max_retries: 2,
            ..config()
        },
        handler.clone(),
        empty_view(),
    );
    executor.start();

    executor.enqueue_download("f1");
    executor.await_idle().await;
    assert_eq!(handler.runs.load(Ordering::SeqCst), 3);
    assert_eq!(handler.abandoned.load(Ordering::SeqCst), 1);

    // A fresh enqueue after abandonment gets a full set of attempts
    executor.enqueue_download("f1");
    executor.await_idle().await;
    assert_eq!(handler.runs.load(Ordering::SeqCst), 6);
    assert_eq!(handler.abandoned.load(Ordering::SeqCst), 2);

    executor.stop();
}

#[tokio::test]
async fn test_pause_lets_inflight_finish() {
    let handler = RecordingHandler::new();
    handler.hold.store(true, Ordering::SeqCst);
    let executor = SyncExecutor::new(config(), handler.clone(), empty_view());
    executor.start();

    executor.enqueue_download("running");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(executor.inflight_count(), 1);

    executor.pause();
    executor.enqueue_download("parked");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(executor.queued_count(), 1);

    // The in-flight task completes while paused
    handler.release();
    let deadline = Instant::now() + Duration::from_secs(2);
    while executor.inflight_count() > 0 {
        assert!(Instant::now() < deadline, "in-flight task did not finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    assert_eq!(executor.queued_count(), 1);

    executor.resume();
    executor.await_idle().await;
    assert_eq!(handler.runs.load(Ordering::SeqCst), 2);

    executor.stop();
}

#[tokio::test]
async fn test_stop_interrupts_backoff() {
    let handler = RecordingHandler::new();
    handler.fail.store(true, Ordering::SeqCst);
    let executor = SyncExecutor::new(
        ExecutorConfig {
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            jitter_ms: 0,
            max_retries: 5,
            ..config()
        },
        handler.clone(),
        empty_view(),
    );
    executor.start();

    executor.enqueue_upload("f1");
    let deadline = Instant::now() + Duration::from_secs(2);
    while handler.runs.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "first attempt never ran");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The intent now sleeps a minute of backoff; stop cancels that sleep
    let stop_started = Instant::now();
    executor.stop();
    executor.await_idle().await;
    assert!(stop_started.elapsed() < Duration::from_secs(5));
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    // Interrupted intents are dropped, not abandoned
    assert_eq!(handler.abandoned.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retry_errors_reads_state_view() {
    let handler = RecordingHandler::new();
    let view = Arc::new(StaticStateView(Mutex::new(HashMap::from([
        ("bad1".to_string(), TransferKind::Upload),
        ("bad2".to_string(), TransferKind::Download),
    ]))));
    let executor = SyncExecutor::new(config(), handler.clone(), view);
    executor.start();

    let requeued = executor.retry_errors().await;
    assert_eq!(requeued, 2);
    executor.await_idle().await;
    assert_eq!(handler.runs.load(Ordering::SeqCst), 2);

    executor.stop();
}

#[tokio::test]
async fn test_await_idle_resolves_immediately_when_empty() {
    let handler = RecordingHandler::new();
    let executor = SyncExecutor::new(config(), handler, empty_view());
    executor.start();
    // No work: must not hang
    executor.await_idle().await;
    executor.stop();
}
