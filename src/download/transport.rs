use async_trait::async_trait;
use futures_util::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{DepotError, Result};

/// Progress sink receiving `(bytes_downloaded, total_bytes)`; a total of 0 means unknown
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One artifact transfer into a partial file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub url: String,
    pub destination: PathBuf,
    /// Bytes already present in `destination` from an earlier attempt
    pub resume_from: u64,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Size of `destination` once the transfer finished
    pub bytes_written: u64,
    pub total_bytes: u64,
    /// Whether an earlier partial file was continued rather than restarted
    pub resumed: bool,
}

/// Moves artifact bytes onto disk
#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    /// Whether partial files can be continued with a range request
    fn supports_resume(&self) -> bool;

    /// Transfer `request.url` into `request.destination`
    ///
    /// Must stop writing as soon as `cancel` fires.
    async fn fetch(
        &self,
        request: TransferRequest,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome>;
}

/// Open a partial file for writing at `resume_from`
///
/// Anything past `resume_from` is discarded: bytes written after the last
/// recorded progress sample are fetched again. An offset of 0 truncates.
pub async fn open_partial(path: &Path, resume_from: u64) -> std::io::Result<tokio::fs::File> {
    if resume_from == 0 {
        return tokio::fs::File::create(path).await;
    }
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(resume_from).await?;
    file.seek(SeekFrom::Start(resume_from)).await?;
    Ok(file)
}

/// Streaming HTTP transport with `Range` resume
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose connections time out after `connect_timeout`
    ///
    /// No overall timeout is applied; artifact transfers can run for a long time.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("modeldepot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DepotError::Other(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactTransport for HttpTransport {
    fn supports_resume(&self) -> bool {
        true
    }

    async fn fetch(
        &self,
        request: TransferRequest,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome> {
        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let on_disk = tokio::fs::metadata(&request.destination)
            .await
            .map_or(0, |m| m.len());
        let mut resume_from = request.resume_from.min(on_disk);

        let mut builder = self.client.get(&request.url);
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if resume_from > 0 {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={resume_from}-"));
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(DepotError::transfer("transfer cancelled")),
            response = builder.send() => response
                .map_err(|e| DepotError::transfer(format!("request failed: {e}")))?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(DepotError::transfer(format!(
                "server answered {status} for {}",
                request.url
            )));
        }

        let remaining = response.content_length().unwrap_or(0);
        let resumed = resume_from > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;
        if !resumed {
            resume_from = 0;
        }
        let total_bytes = if remaining > 0 {
            resume_from + remaining
        } else {
            0
        };

        if resumed {
            tracing::debug!("Resuming {} at byte {resume_from}", request.url);
        }
        let mut file = open_partial(&request.destination, resume_from).await?;

        let mut written = resume_from;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    file.flush().await?;
                    return Err(DepotError::transfer("transfer cancelled"));
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let bytes = chunk.map_err(|e| DepotError::transfer(format!("read failed: {e}")))?;
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
            progress(written, total_bytes);
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(TransferOutcome {
            bytes_written: written,
            total_bytes: if total_bytes > 0 { total_bytes } else { written },
            resumed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const BODY: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    /// Serve BODY once per connection, honouring `Range: bytes=N-` when `ranges` is set
    async fn serve(connections: usize, ranges: bool) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            for _ in 0..connections {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buffer = vec![0u8; 4096];
                let read = socket.read(&mut buffer).await.unwrap();
                let head = String::from_utf8_lossy(&buffer[..read]).to_lowercase();
                log.lock().push(head.clone());

                let start = head
                    .lines()
                    .find_map(|l| l.strip_prefix("range: bytes="))
                    .and_then(|r| r.trim_end_matches('-').trim().parse::<usize>().ok())
                    .filter(|_| ranges);
                let (status, body) = match start {
                    Some(start) => ("206 Partial Content", &BODY[start..]),
                    None => ("200 OK", BODY),
                };
                let header = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                socket.write_all(header.as_bytes()).await.unwrap();
                socket.write_all(body).await.unwrap();
            }
        });
        (format!("http://{address}/model.bin"), seen)
    }

    fn request(url: &str, destination: PathBuf, resume_from: u64) -> TransferRequest {
        TransferRequest {
            url: url.to_string(),
            destination,
            resume_from,
            bearer_token: Some("secret".to_string()),
        }
    }

    fn sink() -> (ProgressFn, Arc<Mutex<Vec<(u64, u64)>>>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let writer = samples.clone();
        (Arc::new(move |bytes, total| writer.lock().push((bytes, total))), samples)
    }

    #[tokio::test]
    async fn test_fresh_transfer() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("nested/model.tmp");
        let (url, seen) = serve(1, true).await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let (progress, samples) = sink();

        let outcome = transport
            .fetch(request(&url, destination.clone(), 0), progress, CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.resumed);
        assert_eq!(outcome.bytes_written, BODY.len() as u64);
        assert_eq!(outcome.total_bytes, BODY.len() as u64);
        assert_eq!(std::fs::read(&destination).unwrap(), BODY);
        assert_eq!(samples.lock().last().copied(), Some((36, 36)));

        let head = seen.lock()[0].clone();
        assert!(head.contains("authorization: bearer secret"));
        assert!(!head.contains("range:"));
    }

    #[tokio::test]
    async fn test_partial_content_appends() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("model.tmp");
        std::fs::write(&destination, &BODY[..10]).unwrap();
        let (url, seen) = serve(1, true).await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let (progress, samples) = sink();

        let outcome = transport
            .fetch(request(&url, destination.clone(), 10), progress, CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.resumed);
        assert_eq!(outcome.bytes_written, BODY.len() as u64);
        assert_eq!(std::fs::read(&destination).unwrap(), BODY);
        assert!(seen.lock()[0].contains("range: bytes=10-"));
        assert!(samples.lock().iter().all(|(bytes, total)| *bytes > 10 && *total == 36));
    }

    #[tokio::test]
    async fn test_resume_discards_bytes_past_recorded_offset() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("model.tmp");
        // Ten bytes landed after the last recorded progress sample
        std::fs::write(&destination, &BODY[..20]).unwrap();
        let (url, seen) = serve(1, true).await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let (progress, _) = sink();

        let outcome = transport
            .fetch(request(&url, destination.clone(), 10), progress, CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.resumed);
        assert!(seen.lock()[0].contains("range: bytes=10-"));
        assert_eq!(outcome.bytes_written, BODY.len() as u64);
        assert_eq!(std::fs::read(&destination).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_open_partial_truncates_to_offset() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.tmp");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut file = open_partial(&path, 4).await.unwrap();
        file.write_all(b"xy").await.unwrap();
        file.flush().await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"0123xy");

        let file = open_partial(&path, 0).await.unwrap();
        drop(file);
        assert!(std::fs::read(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_response_to_range_restarts() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("model.tmp");
        std::fs::write(&destination, b"garbage!!!").unwrap();
        let (url, _) = serve(1, false).await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let (progress, _) = sink();

        let outcome = transport
            .fetch(request(&url, destination.clone(), 10), progress, CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.resumed);
        assert_eq!(std::fs::read(&destination).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_resume_offset_capped_by_file_size() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("model.tmp");
        let (url, seen) = serve(1, true).await;
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let (progress, _) = sink();

        // No partial file on disk, so the stale offset is ignored
        let outcome = transport
            .fetch(request(&url, destination.clone(), 20), progress, CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.resumed);
        assert!(!seen.lock()[0].contains("range:"));
        assert_eq!(std::fs::read(&destination).unwrap(), BODY);
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let temp_dir = TempDir::new().unwrap();
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let (progress, _) = sink();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = transport
            .fetch(
                request("http://127.0.0.1:9/model.bin", temp_dir.path().join("m.tmp"), 0),
                progress,
                cancel,
            )
            .await;
        assert!(matches!(result, Err(DepotError::Transfer { .. })));
    }

    #[tokio::test]
    async fn test_error_status_is_transfer_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = vec![0u8; 4096];
            let _ = socket.read(&mut buffer).await;
            socket
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
        });
        let temp_dir = TempDir::new().unwrap();
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let (progress, _) = sink();

        let err = transport
            .fetch(
                request(&format!("http://{address}/x"), temp_dir.path().join("m.tmp"), 0),
                progress,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
