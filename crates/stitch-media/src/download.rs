//! Streaming HTTP download of source videos.

use futures::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::remove_if_exists;
use crate::metrics;

/// Default per-download timeout.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Fetches source videos into a job's scratch directory.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_TIMEOUT)
    }
}

impl Downloader {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// Non-2xx responses fail. A `text/*` content type means the host served
    /// a page (login wall, error page) instead of media and fails as a
    /// blocked source. No partial file is left behind on failure.
    pub async fn download(&self, url: &str, dest: impl AsRef<Path>) -> MediaResult<u64> {
        let dest = dest.as_ref();
        let started = Instant::now();

        let result = tokio::time::timeout(self.timeout, self.fetch(url, dest)).await;
        let result = match result {
            Ok(inner) => inner,
            Err(_) => Err(MediaError::Timeout(self.timeout.as_secs())),
        };

        match result {
            Ok(bytes) => {
                let elapsed = started.elapsed().as_secs_f64();
                metrics::record_download(bytes, elapsed);
                info!(url, bytes, elapsed_secs = elapsed, "Downloaded source");
                Ok(bytes)
            }
            Err(e) => {
                let _ = remove_if_exists(dest).await;
                Err(e)
            }
        }
    }

    async fn fetch(&self, url: &str, dest: &Path) -> MediaResult<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::download_failed(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::download_failed(format!(
                "{} returned HTTP {}",
                url, status
            )));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            debug!(url, content_type, "Source content type");
            if content_type.trim().to_ascii_lowercase().starts_with("text/") {
                return Err(MediaError::BlockedSource {
                    url: url.to_string(),
                    content_type: content_type.to_string(),
                });
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MediaError::download_failed(format!("{}: {}", url, e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp4")
                    .set_body_bytes(vec![7u8; 5000]),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input_0.mp4");
        let bytes = Downloader::default()
            .download(&format!("{}/a.mp4", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 5000);
        assert_eq!(tokio::fs::metadata(&dest).await.unwrap().len(), 5000);
    }

    #[tokio::test]
    async fn test_http_error_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input_0.mp4");
        let err = Downloader::default()
            .download(&format!("{}/missing.mp4", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::DownloadFailed { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_html_response_is_blocked_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html>Sign in</html>"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("input_0.mp4");
        let err = Downloader::default()
            .download(&format!("{}/private.mp4", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::BlockedSource { .. }));
        assert!(!dest.exists());
    }
}
