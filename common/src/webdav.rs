//! Single-connection HTTP download path.
//!
//! Used when the native parallel protocol is not available. The object is fetched from the WebDAV gateway with
//! the ticket as a query parameter, written in 64 KiB chunks, and accepted only if both the byte count and the
//! digest match what the store advertised.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use backoff::backoff::Constant;
use backoff::future::retry_notify;
use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

use crate::config::StoreConfig;
use crate::error::{Error, from_io};
use crate::hash;

pub const WEBDAV_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Download state that survives a retried read.
struct ReadCursor {
    file: tokio::fs::File,
    written: u64,
    attempt: u32,
}

enum ReadFailure {
    /// connection dropped or body ended early; resume with a range request
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct WebDavDownloader {
    client: reqwest::Client,
    base_url: String,
    ticket: String,
    retry: RetrySettings,
}

impl WebDavDownloader {
    pub fn new(store: &StoreConfig, ticket: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!(
                "{}{}",
                store.webdav_url.trim_end_matches('/'),
                store.webdav_prefix
            ),
            ticket: ticket.to_string(),
            retry: RetrySettings::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self, remote_path: &str) -> String {
        format!("{}{}?ticket={}", self.base_url, remote_path, self.ticket)
    }

    /// Downloads `entry` to `local`, verifying size and digest; returns bytes written.
    #[instrument(skip(self, entry, callback), fields(remote = %entry.path))]
    pub async fn download(
        &self,
        entry: &remote::Entry,
        local: &Path,
        callback: Option<remote::ProgressCallback>,
    ) -> Result<u64> {
        let checksum = entry
            .checksum
            .as_ref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| anyhow!("{:?} has no checksum to verify the download against", entry.path))?;
        let file = tokio::fs::File::create(local)
            .await
            .map_err(|err| from_io(local, err))
            .with_context(|| format!("failed to create {:?}", local))?;
        let report = |processed: u64| {
            if let Some(callback) = &callback {
                callback(processed as i64, entry.size as i64);
            }
        };
        if entry.size == 0 {
            report(0);
            return Ok(0);
        }
        let url = self.url(&entry.path);
        let cursor = tokio::sync::Mutex::new(ReadCursor {
            file,
            written: 0,
            attempt: 0,
        });
        let attempts = self.retry.attempts.max(1);
        {
            let (cursor, url, report) = (&cursor, url.as_str(), &report);
            retry_notify(
                Constant::new(self.retry.delay),
                move || async move {
                    let mut cursor = cursor.lock().await;
                    cursor.attempt += 1;
                    match self.read_from(url, &mut cursor, entry.size, report).await {
                        Ok(()) => Ok(()),
                        Err(ReadFailure::Transient(err)) if cursor.attempt < attempts => {
                            tracing::debug!("read interrupted at offset {}", cursor.written);
                            Err(backoff::Error::transient(err))
                        }
                        Err(ReadFailure::Transient(err) | ReadFailure::Fatal(err)) => {
                            Err(backoff::Error::permanent(err))
                        }
                    }
                },
                |err: anyhow::Error, wait: Duration| {
                    tracing::warn!("read from {} failed ({:#}), retrying in {:?}", url, err, wait);
                },
            )
            .await
            .with_context(|| format!("failed to download {:?}", entry.path))?;
        }
        let ReadCursor { mut file, written, .. } = cursor.into_inner();
        file.flush().await.map_err(|err| from_io(local, err))?;
        drop(file);
        if written != entry.size {
            return Err(anyhow!(
                "size mismatch for {:?}: expected {} bytes, wrote {}",
                entry.path,
                entry.size,
                written
            ));
        }
        hash::verify_file(local, checksum)
            .await
            .with_context(|| format!("downloaded {:?} failed verification", entry.path))?;
        Ok(written)
    }

    async fn read_from(
        &self,
        url: &str,
        cursor: &mut ReadCursor,
        size: u64,
        report: &impl Fn(u64),
    ) -> Result<(), ReadFailure> {
        let ReadCursor { file, written, .. } = cursor;
        let mut request = self.client.get(url);
        if *written > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", *written));
        }
        let response = request.send().await.map_err(|source| {
            ReadFailure::Transient(
                Error::Dial {
                    url: url.to_string(),
                    source,
                }
                .into(),
            )
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReadFailure::Fatal(
                Error::WebDav {
                    url: url.to_string(),
                    status: status.as_u16(),
                }
                .into(),
            ));
        }
        if *written > 0 && status != reqwest::StatusCode::PARTIAL_CONTENT {
            tracing::debug!("server ignored range request, restarting from the beginning");
            file.set_len(0)
                .await
                .map_err(|err| ReadFailure::Fatal(err.into()))?;
            file.seek(std::io::SeekFrom::Start(0))
                .await
                .map_err(|err| ReadFailure::Fatal(err.into()))?;
            *written = 0;
        }
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = tokio_util::io::StreamReader::new(stream);
        let mut buffer = vec![0u8; WEBDAV_CHUNK_SIZE];
        loop {
            let n = fill_chunk(&mut reader, &mut buffer)
                .await
                .map_err(|err| ReadFailure::Transient(err.into()))?;
            if n == 0 {
                break;
            }
            if *written + n as u64 > size {
                return Err(ReadFailure::Fatal(anyhow!(
                    "server sent more than the advertised {} bytes",
                    size
                )));
            }
            file.write_all(&buffer[..n])
                .await
                .map_err(|err| ReadFailure::Fatal(err.into()))?;
            *written += n as u64;
            report(*written);
        }
        if *written < size {
            return Err(ReadFailure::Transient(anyhow!(
                "body ended after {} of {} bytes",
                *written,
                size
            )));
        }
        Ok(())
    }
}

/// Reads until `buffer` is full or the stream ends.
async fn fill_chunk<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::serve;
    use axum::http::StatusCode;
    use remote::checksum::{ChecksumAlgorithm, hash_bytes};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn payload() -> Vec<u8> {
        (0..200_000u32).map(|i| (i % 253) as u8).collect()
    }

    async fn gateway() -> Result<StoreConfig> {
        let router = axum::Router::new()
            .route(
                "/dav-anon/iplant/good.bin",
                axum::routing::get(|| async { payload() }),
            )
            .route(
                "/dav-anon/iplant/denied.bin",
                axum::routing::get(|| async { (StatusCode::NOT_FOUND, "no such object") }),
            )
            .route("/dav-anon/iplant/flaky.bin", axum::routing::get(flaky))
            .route(
                "/dav-anon/iplant/truncated.bin",
                axum::routing::get(|| async { payload()[..PARTIAL].to_vec() }),
            );
        let url = serve(router).await?;
        let mut store = StoreConfig::new("/unused");
        store.webdav_url = url;
        Ok(store)
    }

    const PARTIAL: usize = 70_000;

    /// Cuts the first response short and honors ranged follow-ups.
    async fn flaky(headers: axum::http::HeaderMap) -> (StatusCode, Vec<u8>) {
        let data = payload();
        let offset = headers
            .get(reqwest::header::RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("bytes="))
            .and_then(|value| value.trim_end_matches('-').parse::<usize>().ok());
        match offset {
            Some(offset) => (StatusCode::PARTIAL_CONTENT, data[offset..].to_vec()),
            None => (StatusCode::OK, data[..PARTIAL].to_vec()),
        }
    }

    fn entry(path: &str, data: &[u8], algorithm: ChecksumAlgorithm) -> remote::Entry {
        remote::Entry {
            path: path.to_string(),
            name: remote::basename(path).to_string(),
            size: data.len() as u64,
            is_dir: false,
            checksum: Some(hash_bytes(data, algorithm)),
            modified: None,
        }
    }

    fn quick(downloader: WebDavDownloader) -> WebDavDownloader {
        downloader.with_retry(RetrySettings {
            attempts: 2,
            delay: Duration::from_millis(10),
        })
    }

    #[test]
    fn url_carries_ticket() {
        let downloader = WebDavDownloader::new(&StoreConfig::new("/m"), "tkt");
        assert_eq!(
            downloader.url("/iplant/home/a.bin"),
            "https://data.cyverse.org/dav-anon/iplant/home/a.bin?ticket=tkt"
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn verified_download_in_chunks() -> Result<()> {
        let store = gateway().await?;
        let tmp = tempfile::tempdir()?;
        let local = tmp.path().join("good.bin");
        let calls = Arc::new(AtomicUsize::new(0));
        let callback: remote::ProgressCallback = {
            let calls = calls.clone();
            Arc::new(move |processed, total| {
                assert!(processed <= total);
                calls.fetch_add(1, Ordering::Relaxed);
            })
        };
        let data = payload();
        let downloader = quick(WebDavDownloader::new(&store, "tkt"));
        let written = downloader
            .download(&entry("/iplant/good.bin", &data, ChecksumAlgorithm::Sha256), &local, Some(callback))
            .await?;
        assert_eq!(written, data.len() as u64);
        assert_eq!(tokio::fs::read(&local).await?, data);
        assert_eq!(calls.load(Ordering::Relaxed), data.len().div_ceil(WEBDAV_CHUNK_SIZE));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn interrupted_read_resumes_with_range() -> Result<()> {
        let store = gateway().await?;
        let tmp = tempfile::tempdir()?;
        let local = tmp.path().join("flaky.bin");
        let data = payload();
        let downloader = quick(WebDavDownloader::new(&store, "tkt"));
        let written = downloader
            .download(&entry("/iplant/flaky.bin", &data, ChecksumAlgorithm::Md5), &local, None)
            .await?;
        assert_eq!(written, data.len() as u64);
        assert_eq!(tokio::fs::read(&local).await?, data);
        assert!(logs_contain("body ended after 70000 of 200000 bytes"));
        assert!(logs_contain("retrying in"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn short_reads_give_up_after_configured_attempts() -> Result<()> {
        let store = gateway().await?;
        let tmp = tempfile::tempdir()?;
        let downloader = quick(WebDavDownloader::new(&store, "tkt"));
        let err = downloader
            .download(
                &entry("/iplant/truncated.bin", &payload(), ChecksumAlgorithm::Md5),
                &tmp.path().join("truncated.bin"),
                None,
            )
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("body ended after 70000 of 200000 bytes"));
        assert!(logs_contain("server ignored range request"));
        Ok(())
    }

    #[tokio::test]
    async fn digest_mismatch_fails_even_with_full_size() -> Result<()> {
        let store = gateway().await?;
        let tmp = tempfile::tempdir()?;
        let local = tmp.path().join("good.bin");
        let mut advertised = entry("/iplant/good.bin", &payload(), ChecksumAlgorithm::Md5);
        advertised.checksum = Some(hash_bytes(b"something else", ChecksumAlgorithm::Md5));
        let downloader = quick(WebDavDownloader::new(&store, "tkt"));
        let err = downloader.download(&advertised, &local, None).await.unwrap_err();
        assert!(format!("{err:#}").contains("checksum mismatch"));
        assert_eq!(tokio::fs::metadata(&local).await?.len(), advertised.size);
        Ok(())
    }

    #[tokio::test]
    async fn http_failure_is_a_webdav_error() -> Result<()> {
        let store = gateway().await?;
        let tmp = tempfile::tempdir()?;
        let downloader = quick(WebDavDownloader::new(&store, "tkt"));
        let err = downloader
            .download(
                &entry("/iplant/denied.bin", b"x", ChecksumAlgorithm::Md5),
                &tmp.path().join("denied.bin"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            crate::error::kind(&err),
            Some(Error::WebDav { status: 404, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_checksum_and_empty_objects() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let downloader = WebDavDownloader::new(&StoreConfig::new("/m"), "tkt");
        let mut no_checksum = entry("/iplant/x", b"abc", ChecksumAlgorithm::Md5);
        no_checksum.checksum = None;
        assert!(downloader.download(&no_checksum, &tmp.path().join("x"), None).await.is_err());
        let empty = entry("/iplant/empty", b"", ChecksumAlgorithm::Md5);
        assert_eq!(downloader.download(&empty, &tmp.path().join("empty"), None).await?, 0);
        assert_eq!(tokio::fs::metadata(tmp.path().join("empty")).await?.len(), 0);
        Ok(())
    }
}
