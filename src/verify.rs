//! Streams a file through a SHA-256 digest without loading it into memory
//! whole, and compares the result against an expected hash when one is
//! known.

use anyhow::{Context, Error};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Read buffer size for streaming hashing, matching the ~1 MiB guidance.
const BUF_SIZE: usize = 1024 * 1024;

pub struct VerifyResult {
    pub matches: bool,
    pub sha256_hex: String,
}

/// Hashes the file at `path`. If `expected` is `Some`, the comparison is
/// case-insensitive hex equality; if `None`, `matches` is always true but
/// the digest is still returned so it can be recorded.
pub async fn hash_file(path: &Path, expected: Option<&str>) -> Result<VerifyResult, Error> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let sha256_hex = hex::encode(hasher.finalize());
    let matches = match expected {
        Some(exp) => exp.eq_ignore_ascii_case(&sha256_hex),
        None => true,
    };

    Ok(VerifyResult {
        matches,
        sha256_hex,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn matches_known_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        // SHA-256("hello world")
        let expected = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde";
        let result = hash_file(file.path(), Some(expected)).await.unwrap();
        assert!(result.matches);
        assert_eq!(result.sha256_hex, expected);
    }

    #[tokio::test]
    async fn case_insensitive_and_mismatch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let upper = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE";
        let result = hash_file(file.path(), Some(upper)).await.unwrap();
        assert!(result.matches);

        let wrong = "0".repeat(64);
        let result = hash_file(file.path(), Some(&wrong)).await.unwrap();
        assert!(!result.matches);
    }

    #[tokio::test]
    async fn no_expected_always_matches() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"anything").unwrap();
        let result = hash_file(file.path(), None).await.unwrap();
        assert!(result.matches);
        assert_eq!(result.sha256_hex.len(), 64);
    }
}
