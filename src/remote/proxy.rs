//! Worker-proxied remote storage adapter
//!
//! Instead of signing external object-store URLs, this variant serves the
//! bytes itself behind a proxy endpoint and authorizes each request with an
//! HMAC-SHA256 signature over `method\nkey\nexp`, carried as `exp`/`sig`
//! query parameters. The engine sees the same [`RemoteStorage`] contract.

use crate::core::{paths, FileBlob, SyncError, SyncResult};
use crate::remote::{ProgressFn, RemoteStorage, UploadOutcome};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature for `method\nkey\nexp`.
pub fn sign_request(secret: &[u8], method: &str, key: &str, exp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(method.as_bytes());
    mac.update(b"\n");
    mac.update(key.as_bytes());
    mac.update(b"\n");
    mac.update(exp.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature produced by [`sign_request`]. Comparison is constant
/// time; an expired `exp` fails regardless of the signature.
pub fn verify_request(
    secret: &[u8],
    method: &str,
    key: &str,
    exp: i64,
    signature: &str,
    now_millis: i64,
) -> bool {
    if exp < now_millis {
        return false;
    }
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(method.as_bytes());
    mac.update(b"\n");
    mac.update(key.as_bytes());
    mac.update(b"\n");
    mac.update(exp.to_string().as_bytes());
    mac.verify_slice(&sig_bytes).is_ok()
}

pub struct ProxyRemoteStorage {
    http: reqwest::Client,
    base_url: String,
    secret: Vec<u8>,
    /// Signed URL lifetime in milliseconds.
    url_ttl_ms: i64,
}

impl ProxyRemoteStorage {
    pub fn new(base_url: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
            url_ttl_ms: 5 * 60 * 1000,
        }
    }

    pub fn with_url_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.url_ttl_ms = ttl_ms;
        self
    }

    fn signed_url(&self, method: &str, key: &str) -> String {
        let exp = crate::core::now_millis() + self.url_ttl_ms;
        let sig = sign_request(&self.secret, method, key, exp);
        format!("{}/blobs/{key}?exp={exp}&sig={sig}", self.base_url)
    }
}

#[async_trait]
impl RemoteStorage for ProxyRemoteStorage {
    async fn upload(
        &self,
        blob: &FileBlob,
        key: &str,
        progress: Option<ProgressFn>,
    ) -> SyncResult<UploadOutcome> {
        let url = self.signed_url("PUT", key);
        if let Some(cb) = &progress {
            cb(0, blob.len() as u64);
        }

        let response = self
            .http
            .put(&url)
            .header(CONTENT_TYPE, &blob.mime_type)
            .body(blob.bytes.clone())
            .send()
            .await
            .map_err(|e| SyncError::Upload {
                key: key.to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Upload {
                key: key.to_string(),
                cause: format!("proxy answered {status}"),
            });
        }

        if let Some(cb) = &progress {
            cb(blob.len() as u64, blob.len() as u64);
        }
        tracing::info!(key = %key, size = blob.len(), "Uploaded blob via proxy");
        Ok(UploadOutcome {
            key: key.to_string(),
            etag: None,
        })
    }

    async fn download(&self, key: &str, progress: Option<ProgressFn>) -> SyncResult<FileBlob> {
        let url = self.signed_url("GET", key);
        let mut response = self
            .http
            .get(&url)
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
                cause: format!("proxy answered {status}"),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let total = response.content_length().unwrap_or(0);
        let mut body = Vec::with_capacity(total as usize);
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    body.extend_from_slice(&chunk);
                    if let Some(cb) = &progress {
                        cb(body.len() as u64, total.max(body.len() as u64));
                    }
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

        Ok(FileBlob::new(paths::file_name(key), content_type, body))
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        let url = self.signed_url("DELETE", key);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| SyncError::Delete {
                key: key.to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        // Deleting an absent key succeeds.
        if !status.is_success() && status.as_u16() != 404 {
            return Err(SyncError::Delete {
                key: key.to_string(),
                cause: format!("proxy answered {status}"),
            });
        }
        Ok(())
    }

    async fn get_download_url(&self, key: &str) -> SyncResult<String> {
        Ok(self.signed_url("GET", key))
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn test_sign_verify_roundtrip() {
        let sig = sign_request(SECRET, "GET", "files/s/abc", 2_000);
        assert!(verify_request(SECRET, "GET", "files/s/abc", 2_000, &sig, 1_000));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let sig = sign_request(SECRET, "GET", "files/s/abc", 2_000);
        // Wrong method
        assert!(!verify_request(SECRET, "PUT", "files/s/abc", 2_000, &sig, 1_000));
        // Wrong key
        assert!(!verify_request(SECRET, "GET", "files/s/other", 2_000, &sig, 1_000));
        // Wrong expiry
        assert!(!verify_request(SECRET, "GET", "files/s/abc", 3_000, &sig, 1_000));
        // Wrong secret
        assert!(!verify_request(b"other", "GET", "files/s/abc", 2_000, &sig, 1_000));
        // Garbage signature
        assert!(!verify_request(SECRET, "GET", "files/s/abc", 2_000, "zz", 1_000));
    }

    #[test]
    fn test_verify_rejects_expired() {
        let sig = sign_request(SECRET, "GET", "files/s/abc", 1_000);
        assert!(!verify_request(SECRET, "GET", "files/s/abc", 1_000, &sig, 2_000));
    }

    #[test]
    fn test_signed_url_shape() {
        let remote = ProxyRemoteStorage::new("http://localhost:9000/", SECRET);
        let url = remote.signed_url("GET", "files/s/abc");
        assert!(url.starts_with("http://localhost:9000/blobs/files/s/abc?exp="));
        assert!(url.contains("&sig="));
    }
}
