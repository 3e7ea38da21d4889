//! Document download.
//!
//! A [`DocumentSource`] turns a document id into a byte stream with an
//! optional declared length. [`download`] enforces the payload cap twice:
//! once against the declared length before reading, and again while streaming.

use std::future::Future;
use std::path::PathBuf;

use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::error::{Result, ViewerError};

/// Chunk size used by the built-in sources.
const CHUNK_SIZE: usize = 64 * 1024;

/// An in-progress download.
pub struct Download {
    /// Length announced by the transport, if any. Not trusted for the cap.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Vec<u8>>>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl Download {
    /// A download over an in-memory buffer, split into chunks.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let content_length = u64::try_from(bytes.len()).ok();
        let chunks: Vec<Result<Vec<u8>>> = bytes
            .chunks(CHUNK_SIZE)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Self {
            content_length,
            body: stream::iter(chunks).boxed(),
        }
    }
}

/// Where documents come from (network, disk, memory).
pub trait DocumentSource: Send + Sync + 'static {
    fn fetch(&self, document_id: &str) -> impl Future<Output = Result<Download>> + Send;
}

/// Reads documents from the local file system; the id is a path.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    root: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative ids against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, document_id: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(document_id),
            None => PathBuf::from(document_id),
        }
    }
}

impl DocumentSource for FileSource {
    async fn fetch(&self, document_id: &str) -> Result<Download> {
        let path = self.path_for(document_id);
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|e| ViewerError::Io(std::io::Error::other(e)))??;
        Ok(Download::from_bytes(bytes))
    }
}

/// Materialise a document, refusing anything larger than `limit` bytes.
pub async fn download<S: DocumentSource>(
    source: &S,
    document_id: &str,
    limit: u64,
) -> Result<Vec<u8>> {
    let Download {
        content_length,
        mut body,
    } = source.fetch(document_id).await?;

    if let Some(size) = content_length {
        if size > limit {
            return Err(ViewerError::PayloadTooLarge { size, limit });
        }
    }

    let capacity = content_length.unwrap_or(0).min(limit);
    let mut buf = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let size = u64::try_from(buf.len() + chunk.len()).unwrap_or(u64::MAX);
        if size > limit {
            return Err(ViewerError::PayloadTooLarge { size, limit });
        }
        buf.extend_from_slice(&chunk);
    }
    tracing::debug!(document_id, bytes = buf.len(), "Download complete");
    Ok(buf)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    /// Source that lies about its length.
    struct Lying {
        declared: Option<u64>,
        actual: usize,
    }

    impl DocumentSource for Lying {
        async fn fetch(&self, _id: &str) -> Result<Download> {
            let mut dl = Download::from_bytes(vec![0u8; self.actual]);
            dl.content_length = self.declared;
            Ok(dl)
        }
    }

    #[tokio::test]
    async fn test_declared_length_checked_first() {
        let source = Lying {
            declared: Some(1_000),
            actual: 10,
        };
        let err = download(&source, "x", 100).await.unwrap_err();
        assert!(matches!(
            err,
            ViewerError::PayloadTooLarge {
                size: 1_000,
                limit: 100
            }
        ));
    }

    #[tokio::test]
    async fn test_cap_enforced_while_streaming() {
        let source = Lying {
            declared: None,
            actual: CHUNK_SIZE * 3,
        };
        let limit = u64::try_from(CHUNK_SIZE * 2).unwrap();
        let err = download(&source, "x", limit).await.unwrap_err();
        assert!(matches!(err, ViewerError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_within_limit() {
        let source = Lying {
            declared: Some(10),
            actual: 10,
        };
        assert_eq!(download(&source, "x", 10).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = download(&FileSource::new(), "/definitely/not/here.json", 1 << 20)
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::Io(_)));
        assert!(!err.is_retryable());
    }
}
