//! Signer-backed remote storage adapter
//!
//! Signs each operation through the [`SignerClient`], then performs the blob
//! transfer directly against the returned URL. Uploads and downloads come in
//! two flavors: a buffered single-request path and a progress-tracking path
//! that streams the body and surfaces byte-level progress events.

use crate::config::RemoteConfig;
use crate::core::{paths, FileBlob, SyncError, SyncResult};
use crate::remote::signer::{SignerClient, SignedUpload};
use crate::remote::{ProgressFn, RemoteStorage, UploadOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::Method;

/// Chunk size for the progress-tracking upload stream.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

pub struct SignerRemoteStorage {
    signer: SignerClient,
    http: reqwest::Client,
}

impl SignerRemoteStorage {
    pub fn new(config: &RemoteConfig) -> SyncResult<Self> {
        Ok(Self {
            signer: SignerClient::new(config)?,
            http: reqwest::Client::new(),
        })
    }

    fn transfer_headers(signed: &std::collections::HashMap<String, String>) -> SyncResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in signed {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SyncError::Internal(format!("signed header '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncError::Internal(format!("signed header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn upload_method(signed: &SignedUpload) -> Method {
        match signed.method.as_str() {
            "POST" => Method::POST,
            _ => Method::PUT,
        }
    }

    /// The blob sliced into chunks, with the callback fired as each chunk
    /// is handed to the transport.
    fn chunked_with_progress(
        bytes: Bytes,
        progress: ProgressFn,
    ) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
        let total = bytes.len() as u64;
        let mut offset = 0usize;
        let mut chunks: Vec<Bytes> = Vec::new();
        while offset < bytes.len() {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(bytes.len());
            chunks.push(bytes.slice(offset..end));
            offset = end;
        }

        let mut loaded = 0u64;
        futures::stream::iter(chunks.into_iter().map(move |chunk| {
            loaded += chunk.len() as u64;
            progress(loaded, total);
            Ok(chunk)
        }))
    }

    fn progress_body(bytes: Bytes, progress: ProgressFn) -> reqwest::Body {
        reqwest::Body::wrap_stream(Self::chunked_with_progress(bytes, progress))
    }
}

#[async_trait]
impl RemoteStorage for SignerRemoteStorage {
    async fn upload(
        &self,
        blob: &FileBlob,
        key: &str,
        progress: Option<ProgressFn>,
    ) -> SyncResult<UploadOutcome> {
        let signed = self
            .signer
            .sign_upload(key, Some(&blob.mime_type), Some(blob.len() as u64))
            .await?;

        let mut headers = Self::transfer_headers(&signed.headers)?;
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_str(&blob.mime_type).map_err(|e| {
                SyncError::Internal(format!("content type '{}': {e}", blob.mime_type))
            })?);
        headers.entry(CONTENT_LENGTH).or_insert(
            HeaderValue::from_str(&blob.len().to_string())
                .map_err(|e| SyncError::Internal(e.to_string()))?,
        );

        let request = self
            .http
            .request(Self::upload_method(&signed), &signed.url)
            .headers(headers);

        let request = match &progress {
            Some(cb) => {
                cb(0, blob.len() as u64);
                request.body(Self::progress_body(blob.bytes.clone(), cb.clone()))
            }
            None => request.body(blob.bytes.clone()),
        };

        let response = request.send().await.map_err(|e| SyncError::Upload {
            key: key.to_string(),
            cause: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Upload {
                key: key.to_string(),
                cause: format!("object store answered {status} at {}", signed.url),
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        tracing::info!(key = %key, size = blob.len(), "Uploaded blob");
        Ok(UploadOutcome {
            key: key.to_string(),
            etag,
        })
    }

    async fn download(&self, key: &str, progress: Option<ProgressFn>) -> SyncResult<FileBlob> {
        let signed = self.signer.sign_download(key).await?;
        let headers = Self::transfer_headers(&signed.headers)?;

        let response = self
            .http
            .get(&signed.url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| SyncError::Download {
                key: key.to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Download {
                key: key.to_string(),
                cause: format!("object store answered {status} at {}", signed.url),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = match progress {
            Some(cb) => {
                // Incremental chunk reads of the response body. The total
                // may be unknown when the server does not set a length.
                let total = response.content_length().unwrap_or(0);
                let mut body = Vec::with_capacity(total as usize);
                let mut response = response;
                loop {
                    match response.chunk().await {
                        Ok(Some(chunk)) => {
                            body.extend_from_slice(&chunk);
                            cb(body.len() as u64, total.max(body.len() as u64));
                        }
                        Ok(None) => break,
                        Err(e) => {
                            return Err(SyncError::Download {
                                key: key.to_string(),
                                cause: e.to_string(),
                            })
                        }
                    }
                }
                Bytes::from(body)
            }
            None => response.bytes().await.map_err(|e| SyncError::Download {
                key: key.to_string(),
                cause: e.to_string(),
            })?,
        };

        tracing::info!(key = %key, size = bytes.len(), "Downloaded blob");
        Ok(FileBlob::new(paths::file_name(key), content_type, bytes))
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        self.signer.delete(key).await?;
        tracing::info!(key = %key, "Deleted remote blob");
        Ok(())
    }

    async fn get_download_url(&self, key: &str) -> SyncResult<String> {
        Ok(self.signer.sign_download(key).await?.url)
    }

    async fn check_health(&self) -> bool {
        self.signer.health().await
    }
}
