//! Size-qualified content fingerprints.
//!
//! The fingerprint of a file is a hex-encoded SHA-256 over the decimal ASCII
//! size followed by sampled content: the whole file for small files, the
//! head and tail edges for large ones. It is a stable deduplication key for
//! content supplied by a trusted upstream, not a cryptographic commitment to
//! every byte.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of bytes sampled from each edge of a large file (500 KiB).
pub const EDGE_LEN: u64 = 500 * 1024;

/// A 256-bit content fingerprint represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create a fingerprint from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a lowercase hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidFingerprint(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidFingerprint(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidFingerprint(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as a lowercase hex string. This is the blob-store key and the
    /// `file.hash` primary key.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental fingerprint hasher.
///
/// Seeded with the file's declared size so equally-prefixed files of
/// different lengths fingerprint differently.
pub struct FingerprintBuilder(Sha256);

impl FingerprintBuilder {
    /// Create a builder for a file of the given declared size.
    pub fn new(declared_size: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(declared_size.to_string().as_bytes());
        Self(hasher)
    }

    /// Feed sampled content.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the fingerprint.
    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.0.finalize().into())
    }
}

/// Which byte ranges of a file feed the fingerprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplePlan {
    /// Stream the whole file.
    Whole,
    /// Stream `[0, head_end)` followed by `[tail_start, size)`.
    HeadTail { head_end: u64, tail_start: u64 },
}

impl SamplePlan {
    /// Sampling rule: whole file when shorter than two edges, head and tail
    /// edges otherwise.
    pub fn for_size(size: u64) -> Self {
        if size < 2 * EDGE_LEN {
            Self::Whole
        } else {
            Self::HeadTail {
                head_end: EDGE_LEN,
                tail_start: size - EDGE_LEN,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_hash(parts: &[&[u8]]) -> Fingerprint {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Fingerprint::from_bytes(hasher.finalize().into())
    }

    #[test]
    fn hex_round_trip() {
        let fp = reference_hash(&[b"hello"]);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp);
        assert!(Fingerprint::from_hex("abc").is_err());
    }

    #[test]
    fn small_file_hashes_size_then_content() {
        let content = b"some small file content";
        let mut builder = FingerprintBuilder::new(content.len() as u64);
        builder.update(content);

        let expected = reference_hash(&[content.len().to_string().as_bytes(), content]);
        assert_eq!(builder.finish(), expected);
    }

    #[test]
    fn size_separates_identical_prefixes() {
        let mut a = FingerprintBuilder::new(10);
        a.update(b"prefix");
        let mut b = FingerprintBuilder::new(11);
        b.update(b"prefix");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn sample_plan_boundaries() {
        assert_eq!(SamplePlan::for_size(0), SamplePlan::Whole);
        assert_eq!(SamplePlan::for_size(2 * EDGE_LEN - 1), SamplePlan::Whole);
        assert_eq!(
            SamplePlan::for_size(2 * EDGE_LEN),
            SamplePlan::HeadTail {
                head_end: EDGE_LEN,
                tail_start: EDGE_LEN,
            }
        );
        assert_eq!(
            SamplePlan::for_size(3 * EDGE_LEN),
            SamplePlan::HeadTail {
                head_end: EDGE_LEN,
                tail_start: 2 * EDGE_LEN,
            }
        );
    }
}
