use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::Result;
use crate::model::Checksum;

/// Read size used when streaming artifacts through a digest
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Stream `path` through `digest` in fixed-size chunks, returning the byte count
pub(crate) async fn stream_into<D: Digest>(path: &Path, digest: &mut D) -> Result<u64> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
        total += read as u64;
    }
    Ok(total)
}

/// SHA-256 of the file at `path`
pub async fn compute_sha256(path: &Path) -> Result<Checksum> {
    let mut hasher = Sha256::new();
    stream_into(path, &mut hasher).await?;
    Ok(Checksum::from_digest(hasher.finalize().into()))
}

/// Whether the file at `path` hashes to `expected` (hex, any case)
pub async fn verify(path: &Path, expected: &str) -> Result<bool> {
    let actual = compute_sha256(path).await?;
    let matched = actual.matches(expected);
    if !matched {
        tracing::debug!(
            "Checksum mismatch for {}: expected {expected}, got {actual}",
            path.display()
        );
    }
    Ok(matched)
}
