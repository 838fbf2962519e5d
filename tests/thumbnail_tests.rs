//! Thumbnail pipeline behavior: generation, sharing by content hash,
//! config-hash invalidation, non-image skipping, and codec failure scoping.

use filesync::config::{ThumbnailOptions, ThumbnailSize};
use filesync::core::sha256_hex;
use filesync::fs::MemoryFileSystem;
use filesync::storage::LocalBlobStore;
use filesync::store::{MemoryStore, Store, StoreEvent, StoreExt};
use filesync::thumbs::{
    ThumbnailArtifact, ThumbnailCodec, ThumbnailPipeline, ThumbnailStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn png_bytes(seed: u8) -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(&[seed; 16]);
    bytes
}

struct FakeCodec {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl ThumbnailCodec for FakeCodec {
    fn generate(
        &mut self,
        bytes: Vec<u8>,
        _mime_type: &str,
        sizes: &[ThumbnailSize],
        format: &str,
    ) -> Result<Vec<ThumbnailArtifact>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("decode failed".to_string());
        }
        Ok(sizes
            .iter()
            .map(|size| ThumbnailArtifact {
                size_name: size.name.clone(),
                format: format.to_string(),
                // A "thumbnail" derived from the input, truncated per size
                bytes: bytes
                    .iter()
                    .copied()
                    .take(size.max_dimension as usize)
                    .collect(),
            })
            .collect())
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    blobs: Arc<LocalBlobStore>,
    calls: Arc<AtomicUsize>,
    pipeline: Arc<ThumbnailPipeline>,
}

fn fixture_with(options: ThumbnailOptions, fail: bool) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(LocalBlobStore::new(Arc::new(MemoryFileSystem::new())));
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = ThumbnailPipeline::new(
        store.clone(),
        blobs.clone(),
        Box::new(FakeCodec {
            calls: calls.clone(),
            fail,
        }),
        options,
    )
    .unwrap();
    Fixture {
        store,
        blobs,
        calls,
        pipeline,
    }
}

fn fixture() -> Fixture {
    fixture_with(ThumbnailOptions::default(), false)
}

async fn seed_file(f: &Fixture, bytes: &[u8]) -> (String, String) {
    let hash = sha256_hex(bytes);
    let path = format!("files/sid/{hash}");
    f.blobs.write_file(&path, bytes).await.unwrap();
    f.store
        .commit(StoreEvent::FileCreated {
            id: hash.clone(),
            path: path.clone(),
            content_hash: hash.clone(),
            created_at: 1,
            updated_at: 1,
        })
        .await
        .unwrap();
    (hash, path)
}

#[tokio::test]
async fn test_generates_artifacts_for_image_rows() {
    let f = fixture();
    let (hash, _) = seed_file(&f, &png_bytes(1)).await;

    let generated = f.pipeline.run_once().await.unwrap();
    assert_eq!(generated, 1);

    // One artifact per configured size, keyed by content hash
    assert!(f
        .blobs
        .file_exists(&format!("thumbnails/{hash}/small.webp"))
        .await
        .unwrap());
    assert!(f
        .blobs
        .file_exists(&format!("thumbnails/{hash}/medium.webp"))
        .await
        .unwrap());

    let doc = f.store.thumbnail_state().await.unwrap();
    let entry = doc.files.get(&hash).unwrap();
    assert_eq!(entry.content_hash, hash);
    assert_eq!(entry.mime_type, "image/png");
    assert_eq!(
        entry.sizes.get("small").unwrap().status,
        ThumbnailStatus::Done
    );
    assert_eq!(
        entry.sizes.get("medium").unwrap().status,
        ThumbnailStatus::Done
    );

    f.pipeline.shutdown();
}

#[tokio::test]
async fn test_second_pass_is_settled() {
    let f = fixture();
    seed_file(&f, &png_bytes(2)).await;

    f.pipeline.run_once().await.unwrap();
    assert_eq!(f.calls.load(Ordering::SeqCst), 1);

    // Nothing changed: the settled entry short-circuits the worker
    let generated = f.pipeline.run_once().await.unwrap();
    assert_eq!(generated, 0);
    assert_eq!(f.calls.load(Ordering::SeqCst), 1);

    f.pipeline.shutdown();
}

#[tokio::test]
async fn test_identical_bytes_share_artifacts() {
    let f = fixture();
    let bytes = png_bytes(3);
    let (hash, _) = seed_file(&f, &bytes).await;
    f.pipeline.run_once().await.unwrap();
    assert_eq!(f.calls.load(Ordering::SeqCst), 1);

    // A second row with the same bytes under another id cannot exist when
    // ids are content hashes, but rows from other stores' histories can
    // share a hash; simulate one.
    f.store
        .commit(StoreEvent::FileCreated {
            id: "other-id".to_string(),
            path: format!("files/sid/{hash}"),
            content_hash: hash.clone(),
            created_at: 2,
            updated_at: 2,
        })
        .await
        .unwrap();

    f.pipeline.run_once().await.unwrap();
    // Artifacts were adopted from disk; the codec ran only once
    assert_eq!(f.calls.load(Ordering::SeqCst), 1);

    let doc = f.store.thumbnail_state().await.unwrap();
    assert_eq!(
        doc.files.get("other-id").unwrap().sizes.get("small").unwrap().status,
        ThumbnailStatus::Done
    );

    f.pipeline.shutdown();
}

#[tokio::test]
async fn test_non_image_rows_are_skipped() {
    let f = fixture();
    let (hash, _) = seed_file(&f, b"plain text, no magic").await;

    let generated = f.pipeline.run_once().await.unwrap();
    assert_eq!(generated, 0);
    assert_eq!(f.calls.load(Ordering::SeqCst), 0);

    let doc = f.store.thumbnail_state().await.unwrap();
    let entry = doc.files.get(&hash).unwrap();
    assert_eq!(
        entry.sizes.get("small").unwrap().status,
        ThumbnailStatus::Skipped
    );

    f.pipeline.shutdown();
}

#[tokio::test]
async fn test_rows_without_local_bytes_wait() {
    let f = fixture();
    let hash = sha256_hex(b"not downloaded yet");
    f.store
        .commit(StoreEvent::FileCreated {
            id: hash.clone(),
            path: format!("files/sid/{hash}"),
            content_hash: hash.clone(),
            created_at: 1,
            updated_at: 1,
        })
        .await
        .unwrap();

    let generated = f.pipeline.run_once().await.unwrap();
    assert_eq!(generated, 0);
    assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    // No state entry yet: the row is revisited once bytes arrive
    let doc = f.store.thumbnail_state().await.unwrap();
    assert!(!doc.files.contains_key(&hash));

    f.pipeline.shutdown();
}

#[tokio::test]
async fn test_codec_failure_marks_error_without_killing_pipeline() {
    let f = fixture_with(ThumbnailOptions::default(), true);
    let (hash, _) = seed_file(&f, &png_bytes(4)).await;

    // The failing codec must not error the pass itself
    let generated = f.pipeline.run_once().await.unwrap();
    assert_eq!(generated, 0);

    let doc = f.store.thumbnail_state().await.unwrap();
    let entry = doc.files.get(&hash).unwrap();
    let small = entry.sizes.get("small").unwrap();
    assert_eq!(small.status, ThumbnailStatus::Error);
    assert!(small.error.as_deref().unwrap().contains("decode failed"));

    f.pipeline.shutdown();
}

#[tokio::test]
async fn test_config_change_invalidates_artifacts() {
    let f = fixture();
    let bytes = png_bytes(5);
    seed_file(&f, &bytes).await;
    f.pipeline.run_once().await.unwrap();
    assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    f.pipeline.shutdown();

    // Same store, new pipeline with a different size set
    let mut options = ThumbnailOptions::default();
    options.sizes = vec![ThumbnailSize::new("tiny", 32)];
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = ThumbnailPipeline::new(
        f.store.clone(),
        f.blobs.clone(),
        Box::new(FakeCodec {
            calls: calls.clone(),
            fail: false,
        }),
        options,
    )
    .unwrap();

    pipeline.run_once().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let hash = sha256_hex(&bytes);
    assert!(f
        .blobs
        .file_exists(&format!("thumbnails/{hash}/tiny.webp"))
        .await
        .unwrap());

    let doc = f.store.thumbnail_state().await.unwrap();
    let entry = doc.files.get(&hash).unwrap();
    assert!(entry.sizes.contains_key("tiny"));
    assert!(!entry.sizes.contains_key("small"));

    pipeline.shutdown();
}
