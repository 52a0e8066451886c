//! Blob store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads and uploads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Response headers relayed from the blob store.
///
/// The web-seed proxy forwards these to the client verbatim; fields the
/// backend cannot supply stay `None`.
#[derive(Clone, Debug, Default)]
pub struct BlobMeta {
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub content_range: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<time::OffsetDateTime>,
    pub accept_ranges: Option<String>,
    /// True when the backend served a partial (ranged) object.
    pub partial: bool,
}

/// A fetched object: headers plus the body stream.
pub struct BlobObject {
    pub meta: BlobMeta,
    pub stream: ByteStream,
}

/// Object store abstraction keyed by content fingerprint.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Streaming upload. Implementations must not require knowing the
    /// length in advance. Returns the number of bytes written.
    async fn put(&self, key: &str, stream: ByteStream) -> StorageResult<u64>;

    /// Fetch an object. `range` is a raw HTTP `Range` header value
    /// forwarded verbatim to the backend.
    async fn get(&self, key: &str, range: Option<&str>) -> StorageResult<BlobObject>;

    /// Fetch object headers without the body.
    async fn head(&self, key: &str, range: Option<&str>) -> StorageResult<BlobMeta>;

    /// Delete an object. Idempotent: a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Static identifier of the backend type, for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity. Called once at startup.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// A parsed HTTP byte range, resolved against an object of known size.
///
/// Supports the three standard forms `bytes=a-b`, `bytes=a-`, and
/// `bytes=-n`. Used by backends that have to implement range semantics
/// themselves (the filesystem backend); S3 interprets the header natively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRange {
    /// First byte offset, inclusive.
    pub start: u64,
    /// End offset, exclusive.
    pub end: u64,
}

impl ResolvedRange {
    /// Parse a `Range` header value against the object size.
    pub fn parse(header: &str, size: u64) -> StorageResult<Self> {
        let spec = header
            .strip_prefix("bytes=")
            .ok_or_else(|| invalid_range(header))?;
        // Multi-range requests are not supported; take the single spec.
        let (start_str, end_str) = spec.split_once('-').ok_or_else(|| invalid_range(header))?;

        let resolved = match (start_str.is_empty(), end_str.is_empty()) {
            // bytes=-n : final n bytes
            (true, false) => {
                let n: u64 = end_str.parse().map_err(|_| invalid_range(header))?;
                let start = size.saturating_sub(n);
                Self { start, end: size }
            }
            // bytes=a- : from a to the end
            (false, true) => {
                let start: u64 = start_str.parse().map_err(|_| invalid_range(header))?;
                Self { start, end: size }
            }
            // bytes=a-b : inclusive end
            (false, false) => {
                let start: u64 = start_str.parse().map_err(|_| invalid_range(header))?;
                let end_incl: u64 = end_str.parse().map_err(|_| invalid_range(header))?;
                Self {
                    start,
                    end: end_incl.saturating_add(1).min(size),
                }
            }
            (true, true) => return Err(invalid_range(header)),
        };

        if resolved.start >= size || resolved.start >= resolved.end {
            return Err(crate::error::StorageError::InvalidRange(format!(
                "unsatisfiable range {header} for size {size}"
            )));
        }
        Ok(resolved)
    }

    /// Length of the range in bytes. Never zero; `parse` rejects empty
    /// ranges.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// `Content-Range` header value for this range of an object of `size`.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, size)
    }
}

fn invalid_range(header: &str) -> crate::error::StorageError {
    crate::error::StorageError::InvalidRange(format!("failed to parse range header: {header}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_closed_range() {
        let r = ResolvedRange::parse("bytes=0-511", 1024).unwrap();
        assert_eq!(r, ResolvedRange { start: 0, end: 512 });
        assert_eq!(r.len(), 512);
        assert_eq!(r.content_range(1024), "bytes 0-511/1024");
    }

    #[test]
    fn parse_open_range() {
        let r = ResolvedRange::parse("bytes=512-", 1024).unwrap();
        assert_eq!(r, ResolvedRange { start: 512, end: 1024 });
        assert_eq!(r.content_range(1024), "bytes 512-1023/1024");
    }

    #[test]
    fn parse_suffix_range() {
        let r = ResolvedRange::parse("bytes=-100", 1024).unwrap();
        assert_eq!(r, ResolvedRange { start: 924, end: 1024 });
    }

    #[test]
    fn end_clamped_to_size() {
        let r = ResolvedRange::parse("bytes=1000-2000", 1024).unwrap();
        assert_eq!(r.end, 1024);
        assert_eq!(r.content_range(1024), "bytes 1000-1023/1024");
    }

    #[test]
    fn rejects_garbage_and_unsatisfiable() {
        assert!(ResolvedRange::parse("octets=0-1", 10).is_err());
        assert!(ResolvedRange::parse("bytes=-", 10).is_err());
        assert!(ResolvedRange::parse("bytes=xyz-1", 10).is_err());
        assert!(ResolvedRange::parse("bytes=10-", 10).is_err());
        assert!(ResolvedRange::parse("bytes=5-2", 10).is_err());
    }
}
