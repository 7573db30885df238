use chrono::Utc;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::disk::check_disk_space;
use super::locks::KeyedLocks;
use super::transport::{ArtifactTransport, ProgressFn, TransferOutcome, TransferRequest};
use super::work::{WorkConstraints, WorkQueue};
use crate::catalog::CatalogStore;
use crate::config::schema::DownloadConfig;
use crate::error::{DepotError, ErrorClass, Result};
use crate::manifest::{
    compute_sha256, ManifestProvider, ResolvedManifest, SignatureVerifier, VerificationOutcome,
    VerificationReport,
};
use crate::model::{Checksum, DownloadStatus, DownloadTask, InstallState, TaskId};
use crate::store::TaskRepository;

/// Error message left on tasks found DOWNLOADING at startup
pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// Tunables for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSettings {
    pub max_concurrent: usize,
    pub requires_network: bool,
    /// Free space kept on the models volume; 0 disables the check
    pub min_free_space_mb: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for DownloadSettings {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
            requires_network: config.require_network,
            min_free_space_mb: config.min_free_space_mb,
        }
    }
}

/// Collaborators the orchestrator drives
pub struct EngineParts {
    pub tasks: Arc<dyn TaskRepository>,
    pub catalog: Arc<CatalogStore>,
    pub manifests: Arc<dyn ManifestProvider>,
    pub transport: Arc<dyn ArtifactTransport>,
    pub work: Arc<dyn WorkQueue>,
    pub signatures: Option<Arc<dyn SignatureVerifier>>,
}

/// Download task state machine and admission controller
///
/// Every task transition for a model runs under that model's lock. Admission
/// into DOWNLOADING additionally runs under a global admission lock, which is
/// always taken before a model lock and never while one is held.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: Arc<dyn TaskRepository>,
    catalog: Arc<CatalogStore>,
    manifests: Arc<dyn ManifestProvider>,
    transport: Arc<dyn ArtifactTransport>,
    work: Arc<dyn WorkQueue>,
    signatures: Option<Arc<dyn SignatureVerifier>>,
    settings: DownloadSettings,
    admission: tokio::sync::Mutex<()>,
    model_locks: KeyedLocks,
    in_flight: Mutex<HashMap<TaskId, CancellationToken>>,
    // Models whose last transfer failed integrity checks
    stale_manifests: Mutex<HashSet<String>>,
}

impl DownloadOrchestrator {
    #[must_use]
    pub fn new(parts: EngineParts, settings: DownloadSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: parts.tasks,
                catalog: parts.catalog,
                manifests: parts.manifests,
                transport: parts.transport,
                work: parts.work,
                signatures: parts.signatures,
                settings,
                admission: tokio::sync::Mutex::new(()),
                model_locks: KeyedLocks::new(),
                in_flight: Mutex::new(HashMap::new()),
                stale_manifests: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Create a QUEUED task for `model_id`
    ///
    /// A model that already has a QUEUED, DOWNLOADING or PAUSED task gets that
    /// task's id back instead of a second task.
    pub async fn queue_download(&self, model_id: &str) -> Result<TaskId> {
        self.inner.queue(model_id).await
    }

    /// Queue `model_id` and admit it right away if a slot is free
    pub async fn start_download(&self, model_id: &str) -> Result<TaskId> {
        let task_id = self.inner.queue(model_id).await?;
        self.inner.pump_queue().await?;
        Ok(task_id)
    }

    /// Stop a QUEUED or DOWNLOADING task, keeping its partial data
    ///
    /// No-op on PAUSED and terminal tasks; FAILED tasks cannot be paused.
    pub async fn pause_download(&self, task_id: TaskId) -> Result<()> {
        let model_id = self.inner.task(task_id)?.model_id;
        let was_downloading = {
            let _guard = self.inner.model_locks.lock(&model_id).await;
            let task = self.inner.task(task_id)?;
            match task.status {
                DownloadStatus::Queued | DownloadStatus::Downloading => {
                    self.inner.cancel_transfer(task_id);
                    self.inner
                        .transition(task_id, |t| t.status = DownloadStatus::Paused)
                        .await?;
                    tracing::info!(%task_id, model_id = %model_id, "Download paused");
                    task.status == DownloadStatus::Downloading
                }
                DownloadStatus::Failed => {
                    return Err(DepotError::InvalidTransition {
                        task_id,
                        status: task.status,
                        action: "pause",
                    })
                }
                _ => return Ok(()),
            }
        };
        if was_downloading {
            self.inner.pump_queue().await?;
        }
        Ok(())
    }

    /// Continue a PAUSED task
    ///
    /// The task is admitted when a slot is free and otherwise waits in QUEUED
    /// at its original queue position.
    pub async fn resume_download(&self, task_id: TaskId) -> Result<()> {
        self.inner.resume(task_id).await
    }

    /// Move any non-terminal task to CANCELLED and drop its partial data
    pub async fn cancel_download(&self, task_id: TaskId) -> Result<()> {
        self.inner.cancel(task_id).await
    }

    /// Re-queue a FAILED task from zero
    pub async fn retry_download(&self, task_id: TaskId) -> Result<()> {
        let model_id = self.inner.task(task_id)?.model_id;
        {
            let _guard = self.inner.model_locks.lock(&model_id).await;
            let task = self.inner.task(task_id)?;
            if task.status != DownloadStatus::Failed {
                return Err(DepotError::InvalidTransition {
                    task_id,
                    status: task.status,
                    action: "retry",
                });
            }
            if let Some(active) = self.inner.active_task(&model_id) {
                return Err(DepotError::ActiveTaskExists {
                    model_id,
                    task_id: active.task_id,
                });
            }

            self.inner.catalog.layout().delete_partial(&model_id).await;
            self.inner
                .catalog
                .update_download_task_id(&model_id, Some(task_id), Utc::now())
                .await?;
            self.inner
                .transition(task_id, DownloadTask::reset_for_retry)
                .await?;
            tracing::info!(%task_id, model_id = %model_id, "Download re-queued for retry");
        }
        self.inner.pump_queue().await
    }

    /// Handle rows left behind by an unclean shutdown
    ///
    /// DOWNLOADING tasks become PAUSED and wait for an explicit resume; QUEUED
    /// tasks are admitted as capacity allows. Returns the number of tasks paused.
    pub async fn recover(&self) -> Result<usize> {
        let stale = self.inner.tasks.get_by_status(DownloadStatus::Downloading);
        let mut paused = 0;
        for task in &stale {
            let _guard = self.inner.model_locks.lock(&task.model_id).await;
            if self.inner.in_flight.lock().contains_key(&task.task_id) {
                continue;
            }
            self.inner
                .transition(task.task_id, |t| {
                    t.status = DownloadStatus::Paused;
                    t.error_message = Some(INTERRUPTED_MESSAGE.to_string());
                })
                .await?;
            paused += 1;
            tracing::warn!(task_id = %task.task_id, model_id = %task.model_id, "Stale download marked as paused");
        }
        self.inner.pump_queue().await?;
        Ok(paused)
    }

    /// Admit queued tasks while capacity allows
    pub async fn pump_queue(&self) -> Result<()> {
        self.inner.pump_queue().await
    }

    #[must_use]
    pub fn observe_downloads(&self) -> watch::Receiver<Vec<DownloadTask>> {
        self.inner.tasks.observe_all()
    }

    #[must_use]
    pub fn observe_active_downloads(&self) -> watch::Receiver<Vec<DownloadTask>> {
        self.inner.tasks.observe_active_downloads()
    }

    #[must_use]
    pub fn observe_download_progress(&self, task_id: TaskId) -> watch::Receiver<Option<DownloadTask>> {
        self.inner.tasks.observe_by_id(task_id)
    }

    #[must_use]
    pub fn get_max_concurrent_downloads(&self) -> usize {
        self.inner.settings.max_concurrent
    }

    #[must_use]
    pub fn task(&self, task_id: TaskId) -> Option<DownloadTask> {
        self.inner.tasks.get_by_id(task_id)
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.inner.tasks.get_all()
    }

    /// Delete a model's on-disk artifacts, refusing while a session uses it
    pub async fn delete_model_files(&self, model_id: &str) -> Result<usize> {
        if self.inner.catalog.is_model_active_in_session(model_id) {
            return Err(DepotError::ModelInUse(model_id.to_string()));
        }
        let _guard = self.inner.model_locks.lock(model_id).await;
        let removed = self.inner.catalog.delete_model_files(model_id).await;
        if self.inner.active_task(model_id).is_none() && self.inner.catalog.get(model_id).is_some() {
            self.inner
                .catalog
                .update_install_state(model_id, InstallState::NotInstalled, Utc::now())
                .await?;
        }
        Ok(removed)
    }

    /// Checksum recorded for the installed artifact of `model_id`
    #[must_use]
    pub fn get_downloaded_checksum(&self, model_id: &str) -> Option<Checksum> {
        self.inner
            .catalog
            .get(model_id)
            .filter(|p| p.install_state == InstallState::Installed)
            .and_then(|p| p.checksum_sha256)
    }

    /// Re-hash the installed artifact and reconcile its install state
    pub async fn verify_installed(&self, model_id: &str) -> Result<bool> {
        let _guard = self.inner.model_locks.lock(model_id).await;
        let package = self.inner.catalog.require(model_id)?;
        let path = self.inner.catalog.layout().artifact_path(model_id);

        let matched = match (&package.checksum_sha256, path.exists()) {
            (Some(expected), true) => compute_sha256(&path).await? == *expected,
            _ => false,
        };
        let state = if matched {
            InstallState::Installed
        } else {
            InstallState::Error
        };
        self.inner
            .catalog
            .update_install_state(model_id, state, Utc::now())
            .await?;
        tracing::info!(model_id = %model_id, matched, "Installed artifact verified");
        Ok(matched)
    }

    /// Cancel any active task, delete artifacts and drop the catalog row
    pub async fn uninstall(&self, model_id: &str) -> Result<()> {
        if self.inner.catalog.is_model_active_in_session(model_id) {
            return Err(DepotError::ModelInUse(model_id.to_string()));
        }
        self.inner.catalog.require(model_id)?;
        if let Some(active) = self.inner.active_task(model_id) {
            self.inner.cancel(active.task_id).await?;
        }

        let _guard = self.inner.model_locks.lock(model_id).await;
        self.inner.catalog.delete_model_files(model_id).await;
        self.inner.catalog.remove(model_id).await?;
        self.inner.stale_manifests.lock().remove(model_id);
        tracing::info!(model_id = %model_id, "Model uninstalled");
        Ok(())
    }

    /// Delete every task with `status`; only FAILED, CANCELLED and COMPLETED can be swept
    pub async fn sweep(&self, status: DownloadStatus) -> Result<usize> {
        if status.is_active() {
            return Err(DepotError::Other(format!(
                "refusing to sweep {status} tasks; only FAILED, CANCELLED and COMPLETED can be swept"
            )));
        }
        let removed = self.inner.tasks.delete_by_status(status).await?;
        tracing::info!(%status, removed, "Swept download tasks");
        Ok(removed)
    }
}

impl Inner {
    fn task(&self, task_id: TaskId) -> Result<DownloadTask> {
        self.tasks
            .get_by_id(task_id)
            .ok_or_else(|| DepotError::NotFound(format!("download task {task_id}")))
    }

    fn active_task(&self, model_id: &str) -> Option<DownloadTask> {
        self.tasks
            .get_by_model(model_id)
            .into_iter()
            .find(|t| t.status.is_active())
    }

    fn cancel_transfer(&self, task_id: TaskId) {
        if let Some(token) = self.in_flight.lock().remove(&task_id) {
            token.cancel();
        }
        self.work.cancel_by_tag(&task_id.to_string());
    }

    /// Apply `f` to a task row and mirror the new status onto its package
    ///
    /// Callers hold the model lock.
    async fn transition<F>(&self, task_id: TaskId, f: F) -> Result<DownloadTask>
    where
        F: FnOnce(&mut DownloadTask) + Send,
    {
        let mut task = self.task(task_id)?;
        f(&mut task);
        self.tasks.update(task.clone()).await?;
        self.sync_install_state(&task).await?;
        Ok(task)
    }

    async fn sync_install_state(&self, task: &DownloadTask) -> Result<()> {
        let Some(package) = self.catalog.get(&task.model_id) else {
            return Ok(());
        };
        if package.download_task_id.is_some_and(|id| id != task.task_id) {
            return Ok(());
        }
        self.catalog
            .update_install_state(&task.model_id, task.status.into(), Utc::now())
            .await
    }

    async fn queue(&self, model_id: &str) -> Result<TaskId> {
        let package = self.catalog.require(model_id)?;
        let _guard = self.model_locks.lock(model_id).await;

        if let Some(existing) = self.active_task(model_id) {
            tracing::debug!(task_id = %existing.task_id, model_id = %model_id, status = %existing.status, "Reusing active download task");
            return Ok(existing.task_id);
        }

        let task = DownloadTask::queued(model_id, package.size_bytes);
        let task_id = task.task_id;
        self.tasks.insert(task.clone()).await?;
        self.catalog
            .update_download_task_id(model_id, Some(task_id), Utc::now())
            .await?;
        self.sync_install_state(&task).await?;
        tracing::info!(%task_id, model_id = %model_id, "Download queued");
        Ok(task_id)
    }

    fn downloading_count(&self) -> usize {
        self.tasks.get_by_status(DownloadStatus::Downloading).len()
    }

    async fn pump_queue(self: &Arc<Self>) -> Result<()> {
        let _admission = self.admission.lock().await;
        loop {
            if self.downloading_count() >= self.settings.max_concurrent {
                break;
            }
            let Some(next) = self.tasks.get_by_status(DownloadStatus::Queued).into_iter().next() else {
                break;
            };

            let _guard = self.model_locks.lock(&next.model_id).await;
            if self.tasks.get_by_id(next.task_id).map(|t| t.status) != Some(DownloadStatus::Queued) {
                continue;
            }
            self.admit(next.task_id, &next.model_id).await?;
        }
        Ok(())
    }

    /// Move a task into DOWNLOADING and hand its transfer to the work queue
    ///
    /// Callers hold the admission lock and the model lock.
    async fn admit(self: &Arc<Self>, task_id: TaskId, model_id: &str) -> Result<()> {
        self.transition(task_id, |t| {
            t.status = DownloadStatus::Downloading;
            t.error_message = None;
        })
        .await?;

        let token = CancellationToken::new();
        self.in_flight.lock().insert(task_id, token.clone());
        self.work.schedule(
            &task_id.to_string(),
            WorkConstraints {
                requires_network: self.settings.requires_network,
            },
            self.clone().transfer_job(task_id, token),
        );
        tracing::info!(%task_id, model_id = %model_id, "Download admitted");
        Ok(())
    }

    async fn resume(self: &Arc<Self>, task_id: TaskId) -> Result<()> {
        let model_id = self.task(task_id)?.model_id;
        let _admission = self.admission.lock().await;
        let _guard = self.model_locks.lock(&model_id).await;

        let task = self.task(task_id)?;
        match task.status {
            DownloadStatus::Paused => {}
            DownloadStatus::Queued | DownloadStatus::Downloading => return Ok(()),
            status => {
                return Err(DepotError::InvalidTransition {
                    task_id,
                    status,
                    action: "resume",
                })
            }
        }

        let restart = !self.transport.supports_resume();
        if restart {
            self.catalog.layout().delete_partial(&model_id).await;
        }
        self.transition(task_id, |t| {
            t.status = DownloadStatus::Queued;
            t.error_message = None;
            if restart {
                t.bytes_downloaded = 0;
                t.progress = 0.0;
            }
        })
        .await?;

        if self.downloading_count() < self.settings.max_concurrent {
            self.admit(task_id, &model_id).await?;
            tracing::info!(%task_id, model_id = %model_id, restart, "Download resumed");
        } else {
            tracing::info!(%task_id, model_id = %model_id, "Download resumed into queue, no free slot");
        }
        Ok(())
    }

    async fn cancel(self: &Arc<Self>, task_id: TaskId) -> Result<()> {
        let model_id = self.task(task_id)?.model_id;
        let was_downloading = {
            let _guard = self.model_locks.lock(&model_id).await;
            let task = self.task(task_id)?;
            if task.status.is_terminal() {
                return Ok(());
            }
            self.cancel_transfer(task_id);
            self.transition(task_id, |t| {
                t.status = DownloadStatus::Cancelled;
                t.finished_at = Some(Utc::now());
            })
            .await?;
            self.catalog.layout().delete_partial(&model_id).await;
            tracing::info!(%task_id, model_id = %model_id, "Download cancelled");
            task.status == DownloadStatus::Downloading
        };
        if was_downloading {
            self.pump_queue().await?;
        }
        Ok(())
    }

    fn transfer_job(self: Arc<Self>, task_id: TaskId, token: CancellationToken) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.run_transfer(task_id, &token).await {
                tracing::error!(%task_id, "Download job failed to record its outcome: {e}");
            }
            if let Err(e) = self.pump_queue().await {
                tracing::error!("Failed to admit queued downloads: {e}");
            }
        })
    }

    /// Whether `token` still owns a DOWNLOADING task
    fn owns(&self, task_id: TaskId, token: &CancellationToken) -> bool {
        !token.is_cancelled()
            && self.tasks.get_by_id(task_id).map(|t| t.status) == Some(DownloadStatus::Downloading)
    }

    async fn run_transfer(self: &Arc<Self>, task_id: TaskId, token: &CancellationToken) -> Result<()> {
        let task = self.task(task_id)?;
        let model_id = task.model_id.clone();
        if !self.owns(task_id, token) {
            return Ok(());
        }

        let resolved = match self.prepare(&task).await {
            Ok(resolved) => resolved,
            Err(e) => return self.finish_failed(task_id, token, &e).await,
        };

        let layout = self.catalog.layout();
        let partial = layout.partial_path(&model_id);
        let resume_from = if self.transport.supports_resume() {
            task.bytes_downloaded
        } else {
            0
        };
        let request = TransferRequest {
            url: resolved.manifest.download_url.clone(),
            destination: partial.clone(),
            resume_from,
            bearer_token: resolved.bearer_token.clone(),
        };

        let progress: ProgressFn = {
            let tasks = self.tasks.clone();
            let token = token.clone();
            Arc::new(move |bytes, total| {
                if !token.is_cancelled() {
                    tasks.update_progress(task_id, bytes, total);
                }
            })
        };

        tracing::debug!(%task_id, model_id = %model_id, resume_from, url = %request.url, "Transfer starting");
        let outcome = match self.transport.fetch(request, progress, token.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if token.is_cancelled() {
                    tracing::debug!(%task_id, model_id = %model_id, "Transfer stopped after cancellation");
                    return Ok(());
                }
                return self.finish_failed(task_id, token, &e).await;
            }
        };

        self.finish_transfer(task_id, &model_id, token, &resolved, outcome)
            .await
    }

    /// Disk space check and manifest resolution ahead of a transfer
    async fn prepare(&self, task: &DownloadTask) -> Result<ResolvedManifest> {
        let package = self.catalog.require(&task.model_id)?;

        if self.settings.min_free_space_mb > 0 {
            let dir = self.catalog.layout().models_dir();
            tokio::fs::create_dir_all(dir).await?;
            let remaining = package.size_bytes.saturating_sub(task.bytes_downloaded);
            check_disk_space(dir, remaining, self.settings.min_free_space_mb)?;
        }

        let force_refresh = self.stale_manifests.lock().contains(&task.model_id);
        if force_refresh {
            tracing::info!(model_id = %task.model_id, "Re-resolving manifest after integrity failure");
        }
        let resolved = self
            .manifests
            .resolve_manifest(&task.model_id, &package.version, force_refresh)
            .await?;
        self.stale_manifests.lock().remove(&task.model_id);

        let total = if resolved.manifest.size_bytes > 0 {
            resolved.manifest.size_bytes
        } else {
            package.size_bytes
        };
        if total > 0 && total != task.total_bytes {
            let _guard = self.model_locks.lock(&task.model_id).await;
            if self.tasks.get_by_id(task.task_id).map(|t| t.status) == Some(DownloadStatus::Downloading) {
                self.transition(task.task_id, |t| {
                    t.total_bytes = total;
                    // Progress never moves backwards while DOWNLOADING
                    t.progress = DownloadTask::fraction(t.bytes_downloaded, total).max(t.progress);
                })
                .await?;
            }
        }
        Ok(resolved)
    }

    async fn finish_failed(&self, task_id: TaskId, token: &CancellationToken, error: &DepotError) -> Result<()> {
        let model_id = self.task(task_id)?.model_id;
        let _guard = self.model_locks.lock(&model_id).await;
        if !self.owns(task_id, token) {
            return Ok(());
        }
        self.fail(task_id, error).await
    }

    /// Record a failure; callers hold the model lock
    async fn fail(&self, task_id: TaskId, error: &DepotError) -> Result<()> {
        self.in_flight.lock().remove(&task_id);
        let message = error.to_string().lines().next().unwrap_or_default().to_string();
        let task = self
            .transition(task_id, |t| {
                t.status = DownloadStatus::Failed;
                t.error_message = Some(message);
                t.finished_at = Some(Utc::now());
                t.can_retry = error.can_retry();
            })
            .await?;

        match error.class() {
            ErrorClass::Fatal => {
                tracing::error!(%task_id, model_id = %task.model_id, "Download failed: {error}");
            }
            ErrorClass::Recoverable | ErrorClass::Integrity => {
                tracing::warn!(%task_id, model_id = %task.model_id, "Download failed: {error}");
            }
        }
        Ok(())
    }

    async fn finish_transfer(
        &self,
        task_id: TaskId,
        model_id: &str,
        token: &CancellationToken,
        resolved: &ResolvedManifest,
        outcome: TransferOutcome,
    ) -> Result<()> {
        let layout = self.catalog.layout();
        let partial = layout.partial_path(model_id);

        let guard = self.model_locks.lock(model_id).await;
        if !self.owns(task_id, token) {
            return Ok(());
        }

        let verdict = self.check_integrity(model_id, resolved, outcome).await;
        let (checksum, mismatch) = match verdict {
            Ok(verdict) => verdict,
            Err(e) => {
                layout.delete_partial(model_id).await;
                return self.fail(task_id, &e).await;
            }
        };

        if let Some(reason) = mismatch {
            layout.delete_partial(model_id).await;
            self.stale_manifests.lock().insert(model_id.to_string());
            let error = DepotError::Integrity {
                model_id: model_id.to_string(),
                reason: reason.clone(),
            };
            self.fail(task_id, &error).await?;
            drop(guard);
            self.report(model_id, resolved, checksum, VerificationOutcome::Corrupted, Some(reason))
                .await;
            return Ok(());
        }

        let artifact = layout.artifact_path(model_id);
        if let Err(e) = tokio::fs::rename(&partial, &artifact).await {
            return self.fail(task_id, &DepotError::Io(e)).await;
        }
        self.catalog.update_checksum(model_id, checksum.clone()).await?;
        self.in_flight.lock().remove(&task_id);
        self.transition(task_id, |t| {
            t.status = DownloadStatus::Completed;
            t.total_bytes = outcome.total_bytes.max(outcome.bytes_written);
            t.bytes_downloaded = outcome.bytes_written;
            t.progress = 1.0;
            t.finished_at = Some(Utc::now());
            t.error_message = None;
        })
        .await?;
        tracing::info!(%task_id, model_id = %model_id, bytes = outcome.bytes_written, "Download completed and verified");
        drop(guard);

        self.report(model_id, resolved, checksum, VerificationOutcome::Success, None)
            .await;
        Ok(())
    }

    /// Size, checksum and signature checks on the partial file
    ///
    /// Returns the computed checksum and the mismatch reason, if any.
    async fn check_integrity(
        &self,
        model_id: &str,
        resolved: &ResolvedManifest,
        outcome: TransferOutcome,
    ) -> Result<(Checksum, Option<String>)> {
        let manifest = &resolved.manifest;
        let partial = self.catalog.layout().partial_path(model_id);
        let actual = compute_sha256(&partial).await?;

        if manifest.size_bytes > 0 && outcome.bytes_written != manifest.size_bytes {
            return Ok((
                actual,
                Some(format!(
                    "size mismatch: expected {} bytes, got {}",
                    manifest.size_bytes, outcome.bytes_written
                )),
            ));
        }

        if let Some(expected) = &manifest.checksum_sha256 {
            if actual != *expected {
                return Ok((
                    actual.clone(),
                    Some(format!("checksum mismatch: expected {expected}, got {actual}")),
                ));
            }
        }

        if let (Some(signature), Some(key_url), Some(verifier)) = (
            manifest.signature.as_deref(),
            manifest.public_key_url.as_deref(),
            self.signatures.as_ref(),
        ) {
            if !verifier.verify(&partial, signature, key_url).await? {
                return Ok((actual, Some("signature mismatch".to_string())));
            }
        }

        Ok((actual, None))
    }

    async fn report(
        &self,
        model_id: &str,
        resolved: &ResolvedManifest,
        checksum: Checksum,
        outcome: VerificationOutcome,
        failure_reason: Option<String>,
    ) {
        let report = VerificationReport {
            model_id: model_id.to_string(),
            version: resolved.manifest.version.clone(),
            checksum,
            outcome,
            failure_reason,
        };
        if let Err(e) = self.manifests.report_verification(report).await {
            tracing::warn!(
                model_id,
                retry_after = ?e.retry_after(),
                "Verification report not delivered: {e}"
            );
        }
    }
}
