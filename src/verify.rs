//! Streaming content hashes of local files.
//!
//! Drive declares `md5Checksum` as lowercase hex, so that is what
//! [`hash_file`] produces.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// Result of comparing a finished file against its declared hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    /// Local digest equals the declared one.
    Verified,
    /// Local digest differs; the file is left in place.
    Mismatch { expected: String, actual: String },
    /// Verification was disabled, impossible (stdout) or not reached.
    Skipped,
    /// The catalog declared no hash for this file.
    Unavailable,
}

impl Integrity {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Integrity::Mismatch { .. })
    }
}

/// Hash a file reading at most `block_size` bytes at a time.
pub async fn hash_file(path: &Path, block_size: usize) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut context = md5::Context::new();

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// Compare the file at `path` with `expected`.
pub async fn verify_file(path: &Path, expected: Option<&str>, block_size: usize) -> Result<Integrity> {
    let Some(expected) = expected else {
        return Ok(Integrity::Unavailable);
    };

    let actual = hash_file(path, block_size).await?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(Integrity::Verified)
    } else {
        Ok(Integrity::Mismatch {
            expected: expected.to_ascii_lowercase(),
            actual,
        })
    }
}
