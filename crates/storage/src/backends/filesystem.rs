//! Local filesystem storage backend.
//!
//! Implements range semantics itself (S3 interprets the Range header
//! natively). Writes go to a temp file first and are renamed into place.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobMeta, BlobObject, BlobStore, ByteStream, ResolvedRange};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to a path under the root. Keys are hex fingerprints;
    /// anything that could traverse outside the root is rejected.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.contains("..")
            || key.contains('/')
            || key.contains('\\')
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    fn map_open_error(err: std::io::Error, key: &str) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    async fn object_meta(&self, key: &str, range: Option<&str>) -> StorageResult<(PathBuf, BlobMeta, Option<ResolvedRange>)> {
        let path = self.key_path(key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::map_open_error(e, key))?;
        let size = metadata.len();

        let resolved = range.map(|r| ResolvedRange::parse(r, size)).transpose()?;

        let meta = BlobMeta {
            content_type: None,
            content_length: Some(match resolved {
                Some(r) => r.len() as i64,
                None => size as i64,
            }),
            content_range: resolved.map(|r| r.content_range(size)),
            etag: None,
            last_modified: metadata.modified().ok().map(|t| t.into()),
            accept_ranges: Some("bytes".to_string()),
            partial: resolved.is_some(),
        };
        Ok((path, meta, resolved))
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self, stream), fields(backend = "filesystem"))]
    async fn put(&self, key: &str, mut stream: ByteStream) -> StorageResult<u64> {
        let path = self.key_path(key)?;

        // Write to a uniquely-named temp file, fsync, then rename so
        // concurrent writers of the same key never observe partial objects.
        let temp_path = self.root.join(format!(".tmp.{}", Uuid::new_v4()));
        let mut written: u64 = 0;
        let result: StorageResult<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            while let Some(chunk) = stream.try_next().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }

        fs::rename(&temp_path, &path).await?;
        Ok(written)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str, range: Option<&str>) -> StorageResult<BlobObject> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let (path, meta, resolved) = self.object_meta(key, range).await?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Self::map_open_error(e, key))?;

        let mut remaining = match resolved {
            Some(r) => {
                file.seek(std::io::SeekFrom::Start(r.start)).await?;
                r.len()
            }
            None => meta.content_length.unwrap_or(0) as u64,
        };

        let stream = async_stream::try_stream! {
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            while remaining > 0 {
                let want = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    break;
                }
                remaining -= n as u64;
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(BlobObject {
            meta,
            stream: Box::pin(stream),
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str, range: Option<&str>) -> StorageResult<BlobMeta> {
        let (_, meta, _) = self.object_meta(key, range).await?;
        Ok(meta)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn byte_stream(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::iter(vec![Ok(Bytes::from_static(data))]))
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();

        let written = backend.put("abc123", byte_stream(b"hello world")).await.unwrap();
        assert_eq!(written, 11);

        let object = backend.get("abc123", None).await.unwrap();
        assert_eq!(object.meta.content_length, Some(11));
        assert!(!object.meta.partial);
        assert_eq!(collect(object.stream).await, b"hello world");
    }

    #[tokio::test]
    async fn ranged_get() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();
        backend.put("key", byte_stream(b"0123456789")).await.unwrap();

        let object = backend.get("key", Some("bytes=2-5")).await.unwrap();
        assert!(object.meta.partial);
        assert_eq!(object.meta.content_length, Some(4));
        assert_eq!(object.meta.content_range.as_deref(), Some("bytes 2-5/10"));
        assert_eq!(collect(object.stream).await, b"2345");

        let tail = backend.get("key", Some("bytes=-3")).await.unwrap();
        assert_eq!(collect(tail.stream).await, b"789");
    }

    #[tokio::test]
    async fn head_reports_meta_without_body() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();
        backend.put("key", byte_stream(b"abcdef")).await.unwrap();

        let meta = backend.head("key", None).await.unwrap();
        assert_eq!(meta.content_length, Some(6));
        assert_eq!(meta.accept_ranges.as_deref(), Some("bytes"));

        let ranged = backend.head("key", Some("bytes=0-1")).await.unwrap();
        assert!(ranged.partial);
        assert_eq!(ranged.content_length, Some(2));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();

        match backend.get("missing", None).await {
            Err(StorageError::NotFound(_)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();
        backend.put("key", byte_stream(b"x")).await.unwrap();

        backend.delete("key").await.unwrap();
        backend.delete("key").await.unwrap();
        assert!(matches!(
            backend.get("key", None).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(temp.path()).await.unwrap();
        assert!(matches!(
            backend.head("../escape", None).await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            backend.head("a/b", None).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
