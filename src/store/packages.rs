use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::watch;

use crate::error::{DepotError, Result};
use crate::model::{Checksum, InstallState, ModelPackage, TaskId};
use crate::store::JsonSnapshot;

/// Durable table of catalog packages keyed by model id
#[async_trait]
pub trait PackageRepository: Send + Sync {
    fn get(&self, model_id: &str) -> Option<ModelPackage>;

    /// All packages ordered by model id
    fn get_all(&self) -> Vec<ModelPackage>;

    fn get_by_install_state(&self, state: InstallState) -> Vec<ModelPackage>;

    fn observe_all(&self) -> watch::Receiver<Vec<ModelPackage>>;

    /// Insert or replace a single package
    async fn upsert(&self, package: ModelPackage) -> Result<()>;

    /// Upsert a batch of packages in one write
    async fn upsert_all(&self, packages: Vec<ModelPackage>) -> Result<()>;

    async fn update_install_state(
        &self,
        model_id: &str,
        state: InstallState,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_download_task_id(
        &self,
        model_id: &str,
        task_id: Option<TaskId>,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_integrity(
        &self,
        model_id: &str,
        checksum: Option<Checksum>,
        signature: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove a package, returning whether it existed
    async fn delete(&self, model_id: &str) -> Result<bool>;
}

/// In-memory package store with optional JSON persistence
pub struct MemoryPackageStore {
    rows: Mutex<BTreeMap<String, ModelPackage>>,
    all_tx: watch::Sender<Vec<ModelPackage>>,
    snapshot: Option<JsonSnapshot>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for MemoryPackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPackageStore")
            .field("rows", &self.rows.lock().len())
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl Default for MemoryPackageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPackageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rows(Vec::new(), None)
    }

    /// Open a store mirrored to `snapshot`, loading existing rows
    pub fn open(snapshot: JsonSnapshot) -> Result<Self> {
        let rows: Vec<ModelPackage> = snapshot.load()?;
        tracing::debug!(
            "Loaded {} catalog packages from {}",
            rows.len(),
            snapshot.path().display()
        );
        Ok(Self::with_rows(rows, Some(snapshot)))
    }

    fn with_rows(rows: Vec<ModelPackage>, snapshot: Option<JsonSnapshot>) -> Self {
        let rows: BTreeMap<String, ModelPackage> = rows
            .into_iter()
            .map(|p| (p.model_id.clone(), p))
            .collect();
        let (all_tx, _) = watch::channel(rows.values().cloned().collect());
        Self {
            rows: Mutex::new(rows),
            all_tx,
            snapshot,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn publish(&self, rows: &BTreeMap<String, ModelPackage>) {
        self.all_tx.send_replace(rows.values().cloned().collect());
    }

    async fn mutate<F>(&self, model_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ModelPackage) + Send,
    {
        {
            let mut rows = self.rows.lock();
            let row = rows
                .get_mut(model_id)
                .ok_or_else(|| DepotError::NotFound(format!("model '{model_id}'")))?;
            f(row);
            self.publish(&rows);
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let rows: Vec<ModelPackage> = self.rows.lock().values().cloned().collect();
        snapshot.save(&rows).await
    }
}

#[async_trait]
impl PackageRepository for MemoryPackageStore {
    fn get(&self, model_id: &str) -> Option<ModelPackage> {
        self.rows.lock().get(model_id).cloned()
    }

    fn get_all(&self) -> Vec<ModelPackage> {
        self.rows.lock().values().cloned().collect()
    }

    fn get_by_install_state(&self, state: InstallState) -> Vec<ModelPackage> {
        self.rows
            .lock()
            .values()
            .filter(|p| p.install_state == state)
            .cloned()
            .collect()
    }

    fn observe_all(&self) -> watch::Receiver<Vec<ModelPackage>> {
        self.all_tx.subscribe()
    }

    async fn upsert(&self, package: ModelPackage) -> Result<()> {
        self.upsert_all(vec![package]).await
    }

    async fn upsert_all(&self, packages: Vec<ModelPackage>) -> Result<()> {
        {
            let mut rows = self.rows.lock();
            for package in packages {
                rows.insert(package.model_id.clone(), package);
            }
            self.publish(&rows);
        }
        self.persist().await
    }

    async fn update_install_state(
        &self,
        model_id: &str,
        state: InstallState,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(model_id, |row| {
            row.install_state = state;
            row.updated_at = timestamp;
        })
        .await
    }

    async fn update_download_task_id(
        &self,
        model_id: &str,
        task_id: Option<TaskId>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(model_id, |row| {
            row.download_task_id = task_id;
            row.updated_at = timestamp;
        })
        .await
    }

    async fn update_integrity(
        &self,
        model_id: &str,
        checksum: Option<Checksum>,
        signature: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(model_id, |row| {
            row.checksum_sha256 = checksum;
            row.signature = signature;
            row.updated_at = timestamp;
        })
        .await
    }

    async fn delete(&self, model_id: &str) -> Result<bool> {
        let existed = {
            let mut rows = self.rows.lock();
            let existed = rows.remove(model_id).is_some();
            if existed {
                self.publish(&rows);
            }
            existed
        };
        if existed {
            self.persist().await?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeliveryType, ProviderType};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn package(id: &str) -> ModelPackage {
        let now = Utc::now();
        ModelPackage {
            model_id: id.to_string(),
            display_name: id.to_uppercase(),
            version: "1".to_string(),
            provider_type: ProviderType::Tflite,
            delivery_type: DeliveryType::LocalArchive,
            min_app_version: 1,
            size_bytes: 10,
            capabilities: BTreeSet::new(),
            install_state: InstallState::NotInstalled,
            download_task_id: None,
            manifest_url: format!("https://example.com/{id}.json"),
            checksum_sha256: None,
            signature: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_narrow_updates() {
        let store = MemoryPackageStore::new();
        store.upsert(package("b")).await.unwrap();
        store.upsert(package("a")).await.unwrap();

        let ids: Vec<String> = store.get_all().into_iter().map(|p| p.model_id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let later = Utc::now() + chrono::Duration::seconds(5);
        store
            .update_install_state("a", InstallState::Installed, later)
            .await
            .unwrap();
        let row = store.get("a").unwrap();
        assert_eq!(row.install_state, InstallState::Installed);
        assert_eq!(row.updated_at, later);
        assert_eq!(store.get_by_install_state(InstallState::Installed).len(), 1);

        let missing = store
            .update_install_state("zzz", InstallState::Installed, later)
            .await;
        assert!(matches!(missing, Err(DepotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_notifies_observers() {
        let store = MemoryPackageStore::new();
        store.upsert(package("a")).await.unwrap();
        let mut rx = store.observe_all();
        assert_eq!(rx.borrow().len(), 1);

        assert!(store.delete("a").await.unwrap());
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_empty());
        assert!(!store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = JsonSnapshot::new(temp_dir.path().join("packages.json"));
        let checksum = Checksum::parse(&"d".repeat(64)).unwrap();
        {
            let store = MemoryPackageStore::open(snapshot.clone()).unwrap();
            store.upsert(package("a")).await.unwrap();
            store
                .update_integrity("a", Some(checksum.clone()), None, Utc::now())
                .await
                .unwrap();
        }

        let reopened = MemoryPackageStore::open(snapshot).unwrap();
        assert_eq!(reopened.get("a").unwrap().checksum_sha256, Some(checksum));
    }
}
