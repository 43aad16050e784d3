// src/hash.rs

//! SHA-256 hashing for artifact and file integrity
//!
//! Artifacts are verified against the content hash recorded in package
//! metadata before any action may use them, and installed files are hashed
//! when deciding whether a configuration file was modified locally.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

/// Compute the SHA-256 hash of a byte slice as lowercase hex
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hash of everything readable from `reader`
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the SHA-256 hash of a file, streaming its content
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    hash_reader(&mut file)
}

/// Verification result error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sha256 mismatch: expected {}, got {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for VerifyError {}

/// Verify bytes match an expected SHA-256 hash (case-insensitive)
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<(), VerifyError> {
    let actual = sha256(data);
    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Verify a file matches an expected SHA-256 hash
///
/// An unreadable file is reported as a mismatch rather than an I/O error so
/// callers treat it the same way as corrupted content.
pub fn verify_file_sha256(path: &Path, expected: &str) -> Result<(), VerifyError> {
    let actual = hash_file(path).unwrap_or_else(|_| "<file read error>".to_string());
    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_hash_reader_matches_bytes() {
        let data = b"Hello, World!";
        let mut cursor = std::io::Cursor::new(data);
        assert_eq!(hash_reader(&mut cursor).unwrap(), sha256(data));
    }

    #[test]
    fn test_verify_case_insensitive() {
        let hash = sha256(b"test");
        assert!(verify_sha256(b"test", &hash).is_ok());
        assert!(verify_sha256(b"test", &hash.to_uppercase()).is_ok());
    }

    #[test]
    fn test_verify_error_contains_actual() {
        let wrong = "0".repeat(64);
        let err = verify_sha256(b"hello", &wrong).unwrap_err();
        assert_eq!(err.expected, wrong);
        assert_eq!(err.actual, sha256(b"hello"));
    }

    #[test]
    fn test_verify_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, b"payload").unwrap();

        assert!(verify_file_sha256(&path, &sha256(b"payload")).is_ok());
        assert!(verify_file_sha256(&path, &sha256(b"other")).is_err());
        assert!(verify_file_sha256(&dir.path().join("missing"), &sha256(b"payload")).is_err());
    }
}
