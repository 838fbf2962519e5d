//! Sync instance facade and process-wide singleton
//!
//! One [`SyncInstance`] binds one store to one local blob root and one
//! remote. Construction validates the store schema; `start` spawns the
//! executor loop, the store subscription, and the optional health-probe and
//! GC tasks; `dispose` tears everything down and revokes minted URLs.

use crate::config::{SyncOptions, ThumbnailOptions};
use crate::core::{EventBus, EventCallback, SyncError, SyncEvent, SyncResult};
use crate::fs::FileSystem;
use crate::remote::RemoteStorage;
use crate::storage::LocalBlobStore;
use crate::store::{Query, Store};
use crate::sync::executor::{ExecutorConfig, SyncExecutor};
use crate::sync::ingress::{FileStorage, PreprocessorMap};
use crate::sync::reconciler::Reconciler;
use crate::thumbs::pipeline::ThumbnailPipeline;
use crate::thumbs::worker::ThumbnailCodec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct SyncInstance {
    store: Arc<dyn Store>,
    blobs: Arc<LocalBlobStore>,
    remote: Arc<dyn RemoteStorage>,
    events: EventBus,
    executor: Arc<SyncExecutor>,
    reconciler: Arc<Reconciler>,
    files: FileStorage,
    thumbnails: Mutex<Option<Arc<ThumbnailPipeline>>>,
    options: SyncOptions,
    cancel: Mutex<Option<CancellationToken>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl SyncInstance {
    /// Build an instance bound to one store. Fails fast when the store's
    /// schema lacks the tables, documents, or events the engine commits.
    pub fn new(
        store: Arc<dyn Store>,
        fs: Arc<dyn FileSystem>,
        remote: Arc<dyn RemoteStorage>,
        store_id: &str,
        options: SyncOptions,
        preprocessors: PreprocessorMap,
        on_event: Option<EventCallback>,
    ) -> SyncResult<Arc<Self>> {
        store.schema().validate_for_sync()?;

        let events = EventBus::new();
        events.set_callback(on_event);

        let blobs = Arc::new(LocalBlobStore::new(fs));
        let reconciler = Reconciler::new(
            store.clone(),
            blobs.clone(),
            remote.clone(),
            events.clone(),
            store_id,
            options.clone(),
        );
        let executor = SyncExecutor::new(
            ExecutorConfig::from(&options),
            reconciler.clone(),
            reconciler.clone(),
        );
        reconciler.attach_executor(executor.clone());

        let files = FileStorage::new(
            store.clone(),
            blobs.clone(),
            reconciler.clone(),
            executor.clone(),
            preprocessors,
        );

        tracing::info!(store_id = %reconciler.store_id(), "Sync instance created");
        Ok(Arc::new(Self {
            store,
            blobs,
            remote,
            events,
            executor,
            reconciler,
            files,
            thumbnails: Mutex::new(None),
            options,
            cancel: Mutex::new(None),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }))
    }

    /// Attach the thumbnail pipeline. Requires the `thumbnailState`
    /// document and `thumbnailStateSet` event in the store schema.
    pub fn enable_thumbnails(
        self: &Arc<Self>,
        codec: Box<dyn ThumbnailCodec>,
        options: ThumbnailOptions,
    ) -> SyncResult<()> {
        let schema = self.store.schema();
        if !schema.documents.iter().any(|d| d == "thumbnailState") {
            return Err(SyncError::SchemaMismatch {
                missing: "document 'thumbnailState'".to_string(),
            });
        }
        if !schema.events.iter().any(|e| e == "thumbnailStateSet") {
            return Err(SyncError::SchemaMismatch {
                missing: "event 'thumbnailStateSet'".to_string(),
            });
        }

        let pipeline = ThumbnailPipeline::new(self.store.clone(), self.blobs.clone(), codec, options)?;
        *self
            .thumbnails
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(pipeline.clone());

        // Late attach on a running instance starts the pipeline directly.
        if self.started.load(Ordering::SeqCst) {
            if let Some(token) = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone() {
                pipeline.start(token);
            }
        }
        Ok(())
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SyncError::Disposed);
        }
        Ok(())
    }

    /// Start the engine: executor loop, initial reconcile, store
    /// subscription, health probe, GC. Idempotent.
    pub async fn start(self: &Arc<Self>) -> SyncResult<()> {
        self.ensure_live()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        self.executor.start();
        self.reconciler.reconcile().await?;

        self.spawn_subscription_loop(token.clone());
        if self.options.health_check_interval_ms.is_some() {
            self.spawn_health_probe(token.clone());
        }
        if self.options.gc_delay_ms.is_some() {
            self.spawn_gc_loop(token.clone());
        }
        if let Some(pipeline) = self
            .thumbnails
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            pipeline.start(token);
        }

        tracing::info!("Sync instance started");
        Ok(())
    }

    fn spawn_subscription_loop(self: &Arc<Self>, token: CancellationToken) {
        let instance = self.clone();
        let mut changes = self.store.subscribe(Query::ActiveFiles);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = changes.recv() => {
                        match received {
                            Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                                if let Err(error) = instance.reconciler.reconcile().await {
                                    tracing::warn!(error = %error, "Reconcile pass failed");
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            tracing::debug!("Store subscription loop stopped");
        });
    }

    fn spawn_health_probe(self: &Arc<Self>, token: CancellationToken) {
        let Some(interval_ms) = self.options.health_check_interval_ms else {
            return;
        };
        let instance = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let healthy = instance.remote.check_health().await;
                        if let Err(error) = instance.reconciler.set_online(healthy).await {
                            tracing::warn!(error = %error, "Health probe transition failed");
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            tracing::debug!("Health probe stopped");
        });
    }

    fn spawn_gc_loop(self: &Arc<Self>, token: CancellationToken) {
        let Some(delay_ms) = self.options.gc_delay_ms else {
            return;
        };
        let instance = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms.max(1))) => {
                        // Sweep only when the executor sat idle for the
                        // whole delay window.
                        if instance.executor.is_idle() {
                            if let Err(error) = instance.reconciler.sweep_unreferenced_blobs().await {
                                tracing::warn!(error = %error, "GC sweep failed");
                            }
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
            tracing::debug!("GC loop stopped");
        });
    }

    /// Interrupt the scheduler and background loops. In-flight transfers
    /// complete or fail naturally. Idempotent.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
        }
        self.executor.stop();
        tracing::info!("Sync instance stopped");
    }

    /// Stop, then release everything: minted blob URLs, the thumbnail
    /// worker, listeners. The instance rejects all further calls.
    pub fn dispose(&self) {
        self.stop();
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.blobs.revoke_urls();
        if let Some(pipeline) = self
            .thumbnails
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pipeline.shutdown();
        }
        self.events.set_callback(None);
        tracing::info!("Sync instance disposed");
    }

    /// Force a reconciliation pass.
    pub async fn trigger_sync(&self) -> SyncResult<()> {
        self.ensure_live()?;
        self.reconciler.reconcile().await
    }

    pub fn is_online(&self) -> bool {
        self.reconciler.is_online()
    }

    /// Connectivity signal from the host; without one the instance treats
    /// itself as online.
    pub async fn set_online(&self, online: bool) -> SyncResult<()> {
        self.ensure_live()?;
        self.reconciler.set_online(online).await
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Re-enqueue transfers sitting in a terminal error state.
    pub async fn retry_errors(&self) -> SyncResult<usize> {
        self.ensure_live()?;
        Ok(self.executor.retry_errors().await)
    }

    /// Move a file to the head of the download queue.
    pub fn prioritize_download(&self, file_id: &str) {
        self.executor.prioritize(file_id);
    }

    /// Ingress API: save/update/delete/read/resolve.
    pub fn files(&self) -> &FileStorage {
        &self.files
    }

    /// Resolve once queues are empty and nothing is in flight.
    pub async fn await_idle(&self) {
        self.executor.await_idle().await;
    }

    pub fn executor(&self) -> &Arc<SyncExecutor> {
        &self.executor
    }

    pub fn blobs(&self) -> &Arc<LocalBlobStore> {
        &self.blobs
    }
}

// ----- process-wide singleton -----

static GLOBAL_INSTANCE: Mutex<Option<Arc<SyncInstance>>> = Mutex::new(None);

/// Install the process-wide instance. Double init is rejected.
pub fn init_singleton(instance: Arc<SyncInstance>) -> SyncResult<()> {
    let mut global = GLOBAL_INSTANCE.lock().unwrap_or_else(|e| e.into_inner());
    if global.is_some() {
        return Err(SyncError::AlreadyInitialized);
    }
    *global = Some(instance);
    Ok(())
}

/// The process-wide instance installed by [`init_singleton`].
pub fn singleton() -> SyncResult<Arc<SyncInstance>> {
    GLOBAL_INSTANCE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .ok_or(SyncError::NotInitialized)
}

/// Dispose and uninstall the process-wide instance.
pub fn dispose_singleton() -> SyncResult<()> {
    let instance = GLOBAL_INSTANCE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
        .ok_or(SyncError::NotInitialized)?;
    instance.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::remote::MemoryRemoteStorage;
    use crate::store::{MemoryStore, StoreSchema};

    fn instance() -> Arc<SyncInstance> {
        SyncInstance::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryFileSystem::new()),
            Arc::new(MemoryRemoteStorage::new()),
            "sid",
            SyncOptions::default(),
            PreprocessorMap::new(),
            None,
        )
        .unwrap()
    }

    struct BareStore(MemoryStore);

    #[async_trait::async_trait]
    impl Store for BareStore {
        fn schema(&self) -> StoreSchema {
            StoreSchema::default()
        }
        async fn query(&self, query: Query) -> SyncResult<crate::store::QueryResult> {
            self.0.query(query).await
        }
        async fn commit(&self, event: crate::store::StoreEvent) -> SyncResult<()> {
            self.0.commit(event).await
        }
        fn subscribe(
            &self,
            query: Query,
        ) -> tokio::sync::broadcast::Receiver<crate::store::StoreChange> {
            self.0.subscribe(query)
        }
    }

    #[test]
    fn test_schema_validation_rejects_bare_store() {
        let result = SyncInstance::new(
            Arc::new(BareStore(MemoryStore::new())),
            Arc::new(MemoryFileSystem::new()),
            Arc::new(MemoryRemoteStorage::new()),
            "sid",
            SyncOptions::default(),
            PreprocessorMap::new(),
            None,
        );
        assert!(matches!(result, Err(SyncError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let instance = instance();
        instance.start().await.unwrap();
        instance.start().await.unwrap();
        instance.stop();
        instance.stop();
    }

    #[tokio::test]
    async fn test_dispose_rejects_further_calls() {
        let instance = instance();
        instance.start().await.unwrap();
        instance.dispose();

        assert!(matches!(
            instance.trigger_sync().await,
            Err(SyncError::Disposed)
        ));
        assert!(matches!(instance.start().await, Err(SyncError::Disposed)));
        assert!(matches!(
            instance.retry_errors().await,
            Err(SyncError::Disposed)
        ));
    }

    #[tokio::test]
    async fn test_online_default_and_transitions() {
        let instance = instance();
        instance.start().await.unwrap();
        assert!(instance.is_online());

        instance.set_online(false).await.unwrap();
        assert!(!instance.is_online());
        assert!(instance.executor().is_paused());

        instance.set_online(true).await.unwrap();
        assert!(instance.is_online());
        assert!(!instance.executor().is_paused());
        instance.stop();
    }
}
