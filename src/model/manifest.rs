use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Checksum;

/// Integrity and download metadata for one (model, version)
///
/// `checksum_sha256` is absent only for hub-hosted artifacts whose digest is
/// not published up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadManifest {
    pub model_id: String,
    pub version: String,
    pub checksum_sha256: Option<Checksum>,
    pub size_bytes: u64,
    pub download_url: String,
    pub signature: Option<String>,
    pub public_key_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl DownloadManifest {
    /// Cache key
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.model_id.clone(), self.version.clone())
    }

    /// Whether the manifest is past its own expiry or older than `ttl`
    #[must_use]
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        if self.expires_at.is_some_and(|expires| expires <= now) {
            return true;
        }
        now - self.fetched_at >= ttl
    }
}
