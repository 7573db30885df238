use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use super::files::ArtifactLayout;
use crate::error::{DepotError, Result};
use crate::model::{Checksum, InstallState, ModelPackage, TaskId};
use crate::store::PackageRepository;

/// Reports which models are referenced by live usage sessions
pub trait SessionTracker: Send + Sync {
    fn is_model_active(&self, model_id: &str) -> bool;
}

/// Tracker for processes that never hold a model open
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActiveSessions;

impl SessionTracker for NoActiveSessions {
    fn is_model_active(&self, _model_id: &str) -> bool {
        false
    }
}

/// Counts from a catalog refresh
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CatalogReplaceSummary {
    pub inserted: usize,
    pub merged: usize,
    pub retained: usize,
}

/// Merged, authoritative view of installable packages
///
/// Every write goes through a single lock, so a catalog refresh never
/// interleaves with the narrow mutations issued by the download engine.
pub struct CatalogStore {
    repository: Arc<dyn PackageRepository>,
    layout: ArtifactLayout,
    sessions: Arc<dyn SessionTracker>,
    write_lock: tokio::sync::Mutex<()>,
}

impl CatalogStore {
    pub fn new(repository: Arc<dyn PackageRepository>, layout: ArtifactLayout) -> Self {
        Self {
            repository,
            layout,
            sessions: Arc::new(NoActiveSessions),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionTracker>) -> Self {
        self.sessions = sessions;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<ModelPackage> {
        self.repository.get(model_id)
    }

    /// Look up a package, suggesting a close match when it is unknown
    pub fn require(&self, model_id: &str) -> Result<ModelPackage> {
        self.repository.get(model_id).ok_or_else(|| {
            let message = match self.suggest(model_id) {
                Some(candidate) => format!("model '{model_id}' (did you mean '{candidate}'?)"),
                None => format!("model '{model_id}'"),
            };
            DepotError::NotFound(message)
        })
    }

    #[must_use]
    pub fn list(&self) -> Vec<ModelPackage> {
        self.repository.get_all()
    }

    #[must_use]
    pub fn list_by_install_state(&self, state: InstallState) -> Vec<ModelPackage> {
        self.repository.get_by_install_state(state)
    }

    #[must_use]
    pub fn observe(&self) -> watch::Receiver<Vec<ModelPackage>> {
        self.repository.observe_all()
    }

    /// Merge an incoming catalog listing into the persisted one
    ///
    /// Known models keep their install state, task link, integrity metadata
    /// and creation time; descriptive fields come from `incoming`. Persisted
    /// models missing from `incoming` are left untouched.
    pub async fn replace_catalog(&self, incoming: Vec<ModelPackage>) -> Result<CatalogReplaceSummary> {
        let _guard = self.write_lock.lock().await;

        let mut summary = CatalogReplaceSummary::default();
        let mut merged = Vec::with_capacity(incoming.len());
        for package in incoming {
            match self.repository.get(&package.model_id) {
                Some(persisted) => {
                    summary.merged += 1;
                    merged.push(persisted.merged_with(package));
                }
                None => {
                    summary.inserted += 1;
                    merged.push(package);
                }
            }
        }
        summary.retained = self
            .repository
            .get_all()
            .iter()
            .filter(|p| !merged.iter().any(|m| m.model_id == p.model_id))
            .count();

        self.repository.upsert_all(merged).await?;
        tracing::info!(
            inserted = summary.inserted,
            merged = summary.merged,
            retained = summary.retained,
            "Catalog replaced"
        );
        Ok(summary)
    }

    pub async fn update_install_state(
        &self,
        model_id: &str,
        state: InstallState,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self
            .repository
            .get(model_id)
            .is_some_and(|p| p.install_state == state)
        {
            return Ok(());
        }
        tracing::debug!(model_id, %state, "Install state updated");
        self.repository
            .update_install_state(model_id, state, timestamp)
            .await
    }

    pub async fn update_download_task_id(
        &self,
        model_id: &str,
        task_id: Option<TaskId>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.repository
            .update_download_task_id(model_id, task_id, timestamp)
            .await
    }

    /// Record the verified checksum of a model, keeping its signature
    pub async fn update_checksum(&self, model_id: &str, checksum: Checksum) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let package = self.require(model_id)?;
        if package.checksum_sha256.as_ref() == Some(&checksum) {
            return Ok(());
        }
        self.repository
            .update_integrity(model_id, Some(checksum), package.signature, Utc::now())
            .await
    }

    /// Record integrity metadata delivered by a manifest
    ///
    /// Fields already known locally are replaced only by a present value.
    pub async fn update_integrity(
        &self,
        model_id: &str,
        checksum: Option<Checksum>,
        signature: Option<String>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let package = self.require(model_id)?;
        let next_checksum = checksum.or_else(|| package.checksum_sha256.clone());
        let next_signature = signature
            .filter(|s| !s.trim().is_empty())
            .or_else(|| package.signature.clone());
        if next_checksum == package.checksum_sha256 && next_signature == package.signature {
            return Ok(());
        }
        self.repository
            .update_integrity(model_id, next_checksum, next_signature, Utc::now())
            .await
    }

    #[must_use]
    pub fn is_model_active_in_session(&self, model_id: &str) -> bool {
        self.sessions.is_model_active(model_id)
    }

    /// Best-effort removal of a model's on-disk artifacts
    pub async fn delete_model_files(&self, model_id: &str) -> usize {
        let removed = self.layout.delete_all(model_id).await;
        tracing::info!(model_id, removed, "Deleted model files");
        removed
    }

    /// Drop a package row, returning whether it existed
    pub async fn remove(&self, model_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.repository.delete(model_id).await
    }

    /// Closest known model id within two edits of `name`
    #[must_use]
    pub fn suggest(&self, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }

        self.repository
            .get_all()
            .into_iter()
            .map(|p| {
                let distance = levenshtein_distance(name, &p.model_id);
                (p.model_id, distance)
            })
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= 2)
            .map(|(model_id, _)| model_id)
    }
}

/// Calculate Levenshtein distance between two strings
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s2_chars: Vec<char> = s2.chars().collect();
    let mut previous: Vec<usize> = (0..=s2_chars.len()).collect();

    for (i, c1) in s1.chars().enumerate() {
        let mut current = Vec::with_capacity(previous.len());
        current.push(i + 1);
        for (j, c2) in s2_chars.iter().enumerate() {
            let cost = usize::from(c1 != *c2);
            let value = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
            current.push(value);
        }
        previous = current;
    }

    previous[s2_chars.len()]
}
