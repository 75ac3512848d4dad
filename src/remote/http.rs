//! HTTP inventory service.
//!
//! Expects `GET {base}/files` to return a JSON array of [`RemoteFile`]
//! records and `GET {base}/files/{id}/content` to serve the bytes, honouring
//! `Range: bytes=N-` with `206 Partial Content`.

use crate::error::{Result, ScribeError};
use crate::remote::{ByteRange, RemoteFile, RemoteInventory};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, RANGE};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Inventory reached over HTTP.
pub struct HttpInventory {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpInventory {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ScribeError::ConfigInvalidValue {
                key: "remote.url".to_string(),
                message: format!("not an http(s) URL: {base_url}"),
            });
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        })
    }

    fn list_url(&self) -> String {
        format!("{}/files", self.base_url)
    }

    fn content_url(&self, remote_id: &str) -> String {
        format!("{}/files/{}/content", self.base_url, remote_id)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteInventory for HttpInventory {
    fn name(&self) -> &str {
        "http"
    }

    async fn list(&self) -> Result<Vec<RemoteFile>> {
        let response = self
            .request(&self.list_url())
            .send()
            .await
            .map_err(|e| ScribeError::RemoteUnavailable {
                message: format!("failed to reach {}: {e}", self.base_url),
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ScribeError::RemoteUnavailable {
                    message: format!("credentials rejected ({})", response.status()),
                });
            }
            status if !status.is_success() => {
                return Err(ScribeError::RemoteUnavailable {
                    message: format!("inventory listing returned status {status}"),
                });
            }
            _ => {}
        }

        let text = response
            .text()
            .await
            .map_err(|e| ScribeError::transient(format!("failed to read listing: {e}")))?;
        let files: Vec<RemoteFile> = serde_json::from_str(&text)?;
        Ok(files)
    }

    async fn download(
        &self,
        remote_id: &str,
        dest: &Path,
        range: Option<ByteRange>,
    ) -> Result<u64> {
        let mut request = self.request(&self.content_url(remote_id));
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScribeError::transient(format!("failed to start download: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ScribeError::NotFound {
                file_id: remote_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ScribeError::transient(format!(
                "download of {remote_id} returned status {status}"
            )));
        }

        // A server that ignores Range answers 200 with the whole body.
        let mut file = if range.is_some() && status == StatusCode::PARTIAL_CONTENT {
            OpenOptions::new().append(true).create(true).open(dest).await?
        } else {
            File::create(dest).await?
        };

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ScribeError::transient(format!("failed to read chunk: {e}")))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}
