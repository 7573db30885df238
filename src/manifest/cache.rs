use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::DownloadManifest;
use crate::store::JsonSnapshot;

type ManifestKey = (String, String);

/// Resolved manifests keyed by `(model_id, version)` with a TTL
pub struct ManifestCache {
    entries: Mutex<HashMap<ManifestKey, DownloadManifest>>,
    ttl: chrono::Duration,
    snapshot: Option<JsonSnapshot>,
}

impl ManifestCache {
    #[must_use]
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: to_chrono(ttl),
            snapshot: None,
        }
    }

    /// Open a cache mirrored to `snapshot`
    pub fn open(ttl: std::time::Duration, snapshot: JsonSnapshot) -> Result<Self> {
        let rows: Vec<DownloadManifest> = snapshot.load()?;
        let entries = rows.into_iter().map(|m| (m.key(), m)).collect();
        Ok(Self {
            entries: Mutex::new(entries),
            ttl: to_chrono(ttl),
            snapshot: Some(snapshot),
        })
    }

    /// Fresh entry for `(model_id, version)`, if any
    #[must_use]
    pub fn get_fresh(&self, model_id: &str, version: &str, now: DateTime<Utc>) -> Option<DownloadManifest> {
        self.entries
            .lock()
            .get(&(model_id.to_string(), version.to_string()))
            .filter(|m| !m.is_stale(self.ttl, now))
            .cloned()
    }

    pub async fn put(&self, manifest: DownloadManifest) -> Result<()> {
        self.entries.lock().insert(manifest.key(), manifest);
        self.persist().await
    }

    /// Drop every cached version of `model_id`
    pub async fn invalidate(&self, model_id: &str) -> Result<()> {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|(id, _), _| id != model_id);
            before != entries.len()
        };
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let rows: Vec<DownloadManifest> = self.entries.lock().values().cloned().collect();
        snapshot.save(&rows).await
    }
}

fn to_chrono(ttl: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manifest(model_id: &str, version: &str) -> DownloadManifest {
        DownloadManifest {
            model_id: model_id.into(),
            version: version.into(),
            checksum_sha256: None,
            size_bytes: 42,
            download_url: format!("https://cdn.example.com/{model_id}"),
            signature: None,
            public_key_url: None,
            expires_at: None,
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ttl_and_invalidate() {
        let cache = ManifestCache::new(Duration::from_secs(60));
        cache.put(manifest("gemma", "1")).await.unwrap();

        let now = Utc::now();
        assert!(cache.get_fresh("gemma", "1", now).is_some());
        assert!(cache.get_fresh("gemma", "2", now).is_none());
        assert!(cache
            .get_fresh("gemma", "1", now + chrono::Duration::minutes(2))
            .is_none());

        cache.invalidate("gemma").await.unwrap();
        assert!(cache.get_fresh("gemma", "1", now).is_none());
    }

    #[tokio::test]
    async fn test_persisted_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = JsonSnapshot::new(temp_dir.path().join("manifests.json"));
        {
            let cache = ManifestCache::open(Duration::from_secs(3600), snapshot.clone()).unwrap();
            cache.put(manifest("phi", "3")).await.unwrap();
        }
        let cache = ManifestCache::open(Duration::from_secs(3600), snapshot).unwrap();
        assert!(cache.get_fresh("phi", "3", Utc::now()).is_some());
    }
}
