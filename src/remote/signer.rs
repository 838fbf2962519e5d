//! Signer service client
//!
//! The signer is a small HTTP service that mints short-lived URLs against
//! the object store and authorizes deletes:
//!
//! - `GET  /health`
//! - `POST /v1/sign/upload   {key, contentType?, contentLength?}`
//! - `POST /v1/sign/download {key}`
//! - `POST /v1/delete        {key}` -> 204
//!
//! Every call carries the configured bearer token and extra headers.

use crate::config::RemoteConfig;
use crate::core::{SyncError, SyncResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const SIGNER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignUploadRequest<'a> {
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_length: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyRequest<'a> {
    key: &'a str,
}

/// Response of `POST /v1/sign/upload`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUpload {
    /// `PUT` or `POST`.
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Unix epoch milliseconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Response of `POST /v1/sign/download`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedDownload {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

pub struct SignerClient {
    http: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl SignerClient {
    pub fn new(config: &RemoteConfig) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SyncError::Internal(format!("invalid auth token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SyncError::Internal(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SyncError::Internal(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let http = reqwest::Client::builder()
            .timeout(SIGNER_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.signer_base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> SyncResult<R> {
        let url = format!("{}{endpoint}", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::Internal(format!("signer request to {endpoint}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::SignerStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Serialization(format!("signer response from {endpoint}: {e}")))
    }

    pub async fn sign_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
        content_length: Option<u64>,
    ) -> SyncResult<SignedUpload> {
        self.post_json(
            "/v1/sign/upload",
            &SignUploadRequest {
                key,
                content_type,
                content_length,
            },
        )
        .await
    }

    pub async fn sign_download(&self, key: &str) -> SyncResult<SignedDownload> {
        self.post_json("/v1/sign/download", &KeyRequest { key }).await
    }

    /// Authorize and perform a delete. The signer answers 204.
    pub async fn delete(&self, key: &str) -> SyncResult<()> {
        let url = format!("{}/v1/delete", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers.clone())
            .json(&KeyRequest { key })
            .send()
            .await
            .map_err(|e| SyncError::Delete {
                key: key.to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Delete {
                key: key.to_string(),
                cause: format!("signer answered {status}"),
            });
        }
        Ok(())
    }

    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).headers(self.headers.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Signer health check failed");
                false
            }
        }
    }
}
