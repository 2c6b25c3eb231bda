//! File fingerprints for cache addressing.
//!
//! A fingerprint is the BLAKE3 hash of `path:mtime:size`. The path is part
//! of the hashed input, so two distinct files never share a fingerprint even
//! when their metadata is identical.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// A BLAKE3 fingerprint (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// The number of bytes in a fingerprint
    pub const LEN: usize = 32;

    /// Compute BLAKE3 hash of data
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Fingerprint a file from its path, modification time and size
    #[must_use]
    pub fn of_file(path: &Path, modified: SystemTime, size: u64) -> Self {
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let input = format!("{}:{}:{}", path.display(), nanos, size);
        Self::compute(input.as_bytes())
    }

    /// Stat `path` and fingerprint it
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be stat'ed or the platform
    /// does not report modification times
    pub fn of_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self::of_file(path, meta.modified()?, meta.len()))
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or not 32 bytes
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(hex).map_err(|_| HashError::InvalidHex)?;
        if bytes.len() != Self::LEN {
            return Err(HashError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// Hash-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Invalid hex encoding
    InvalidHex,
    /// Invalid length (not 32 bytes)
    InvalidLength(usize),
}

impl std::error::Error for HashError {}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHex => write!(f, "Invalid hex encoding"),
            Self::InvalidLength(len) => write!(f, "Invalid fingerprint length: {} bytes", len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let a = Fingerprint::of_file(Path::new("ci/build.py"), t, 120);
        let b = Fingerprint::of_file(Path::new("ci/build.py"), t, 120);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_metadata() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let base = Fingerprint::of_file(Path::new("ci/build.py"), t, 120);
        assert_ne!(base, Fingerprint::of_file(Path::new("ci/build.py"), t, 121));
        assert_ne!(
            base,
            Fingerprint::of_file(Path::new("ci/build.py"), t + Duration::from_nanos(1), 120)
        );
        assert_ne!(base, Fingerprint::of_file(Path::new("ci/test.py"), t, 120));
    }

    #[test]
    fn test_hex_roundtrip_and_errors() {
        let fp = Fingerprint::compute(b"workflows");
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()), Ok(fp));
        assert_eq!(Fingerprint::from_hex("zz"), Err(HashError::InvalidHex));
        assert_eq!(Fingerprint::from_hex("abcd"), Err(HashError::InvalidLength(2)));
    }

    #[test]
    fn test_serializes_as_hex_string() {
        let fp = Fingerprint::compute(b"x");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_of_path_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "x = 1\n").unwrap();
        let first = Fingerprint::of_path(&path).unwrap();
        assert_eq!(first, Fingerprint::of_path(&path).unwrap());
        assert!(Fingerprint::of_path(&dir.path().join("missing.py")).is_err());
    }
}
