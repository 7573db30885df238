use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

use crate::error::{DepotError, Result};
use crate::model::{DownloadStatus, DownloadTask, TaskId};
use crate::store::JsonSnapshot;

/// Durable table of download tasks
///
/// Queries returning several rows are ordered by `started_at`, oldest first,
/// with insertion order breaking ties.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task, rejecting duplicate ids
    async fn insert(&self, task: DownloadTask) -> Result<()>;

    /// Replace an existing row
    async fn update(&self, task: DownloadTask) -> Result<()>;

    fn get_by_id(&self, task_id: TaskId) -> Option<DownloadTask>;

    fn get_by_model(&self, model_id: &str) -> Vec<DownloadTask>;

    fn get_by_status(&self, status: DownloadStatus) -> Vec<DownloadTask>;

    fn get_all(&self) -> Vec<DownloadTask>;

    /// Subscribe to a single task; yields `None` once the row is gone.
    /// Unknown ids get a closed receiver holding `None`.
    fn observe_by_id(&self, task_id: TaskId) -> watch::Receiver<Option<DownloadTask>>;

    /// Subscribe to every task
    fn observe_all(&self) -> watch::Receiver<Vec<DownloadTask>>;

    /// Subscribe to tasks currently DOWNLOADING
    fn observe_active_downloads(&self) -> watch::Receiver<Vec<DownloadTask>>;

    async fn update_status(&self, task_id: TaskId, status: DownloadStatus) -> Result<()>;

    /// Record transfer progress
    ///
    /// Applied only while the task is DOWNLOADING, and never moves backwards.
    /// This is the hot path and must not block on I/O. Returns whether the
    /// sample was applied.
    fn update_progress(&self, task_id: TaskId, bytes_downloaded: u64, total_bytes: u64) -> bool;

    /// Delete every task with `status`, returning how many were removed
    async fn delete_by_status(&self, status: DownloadStatus) -> Result<usize>;
}

#[derive(Default)]
struct TaskTable {
    rows: Vec<DownloadTask>,
    watchers: HashMap<TaskId, watch::Sender<Option<DownloadTask>>>,
}

impl TaskTable {
    fn position(&self, task_id: TaskId) -> Option<usize> {
        self.rows.iter().position(|t| t.task_id == task_id)
    }

    fn sorted(&self, filter: impl Fn(&DownloadTask) -> bool) -> Vec<DownloadTask> {
        let mut rows: Vec<DownloadTask> = self.rows.iter().filter(|t| filter(t)).cloned().collect();
        // Stable sort keeps insertion order for equal timestamps
        rows.sort_by_key(|t| t.started_at);
        rows
    }

    fn notify_task(&self, task_id: TaskId) {
        if let Some(tx) = self.watchers.get(&task_id) {
            let current = self.position(task_id).map(|i| self.rows[i].clone());
            tx.send_replace(current);
        }
    }
}

/// In-memory task store with optional JSON persistence
///
/// Progress samples update the row and its per-task channel immediately; the
/// aggregate channels are refreshed on progress only when the whole-percent
/// value changes. Progress alone never touches the snapshot file; it is
/// persisted with the next status change.
pub struct MemoryTaskStore {
    table: Mutex<TaskTable>,
    all_tx: watch::Sender<Vec<DownloadTask>>,
    active_tx: watch::Sender<Vec<DownloadTask>>,
    snapshot: Option<JsonSnapshot>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for MemoryTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTaskStore")
            .field("rows", &self.table.lock().rows.len())
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskStore {
    /// Create an empty, non-persistent store
    #[must_use]
    pub fn new() -> Self {
        Self::with_rows(Vec::new(), None)
    }

    /// Open a store mirrored to `snapshot`, loading existing rows
    pub fn open(snapshot: JsonSnapshot) -> Result<Self> {
        let rows: Vec<DownloadTask> = snapshot.load()?;
        tracing::debug!(
            "Loaded {} download tasks from {}",
            rows.len(),
            snapshot.path().display()
        );
        Ok(Self::with_rows(rows, Some(snapshot)))
    }

    fn with_rows(rows: Vec<DownloadTask>, snapshot: Option<JsonSnapshot>) -> Self {
        let table = TaskTable {
            rows,
            watchers: HashMap::new(),
        };
        let all = table.sorted(|_| true);
        let active = table.sorted(|t| t.status == DownloadStatus::Downloading);
        let (all_tx, _) = watch::channel(all);
        let (active_tx, _) = watch::channel(active);
        Self {
            table: Mutex::new(table),
            all_tx,
            active_tx,
            snapshot,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn publish(&self, table: &TaskTable) {
        self.all_tx.send_replace(table.sorted(|_| true));
        self.active_tx
            .send_replace(table.sorted(|t| t.status == DownloadStatus::Downloading));
    }

    fn mutate<F>(&self, task_id: TaskId, f: F) -> Result<()>
    where
        F: FnOnce(&mut DownloadTask),
    {
        let mut table = self.table.lock();
        let index = table
            .position(task_id)
            .ok_or_else(|| DepotError::NotFound(format!("download task {task_id}")))?;
        f(&mut table.rows[index]);
        table.notify_task(task_id);
        self.publish(&table);
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        // Take the rows inside the persist lock so the last writer always saves the latest state
        let rows = self.table.lock().rows.clone();
        snapshot.save(&rows).await
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskStore {
    async fn insert(&self, task: DownloadTask) -> Result<()> {
        {
            let mut table = self.table.lock();
            if table.position(task.task_id).is_some() {
                return Err(DepotError::Store(format!(
                    "download task {} already exists",
                    task.task_id
                )));
            }
            let task_id = task.task_id;
            table.rows.push(task);
            table.notify_task(task_id);
            self.publish(&table);
        }
        self.persist().await
    }

    async fn update(&self, task: DownloadTask) -> Result<()> {
        let task_id = task.task_id;
        self.mutate(task_id, |row| *row = task)?;
        self.persist().await
    }

    fn get_by_id(&self, task_id: TaskId) -> Option<DownloadTask> {
        let table = self.table.lock();
        table.position(task_id).map(|i| table.rows[i].clone())
    }

    fn get_by_model(&self, model_id: &str) -> Vec<DownloadTask> {
        self.table.lock().sorted(|t| t.model_id == model_id)
    }

    fn get_by_status(&self, status: DownloadStatus) -> Vec<DownloadTask> {
        self.table.lock().sorted(|t| t.status == status)
    }

    fn get_all(&self) -> Vec<DownloadTask> {
        self.table.lock().sorted(|_| true)
    }

    fn observe_by_id(&self, task_id: TaskId) -> watch::Receiver<Option<DownloadTask>> {
        let mut table = self.table.lock();
        table.watchers.retain(|_, tx| tx.receiver_count() > 0);
        let Some(index) = table.position(task_id) else {
            // Closed channel: holds `None` and never changes
            return watch::channel(None).1;
        };
        let current = table.rows[index].clone();
        table
            .watchers
            .entry(task_id)
            .or_insert_with(|| watch::channel(Some(current)).0)
            .subscribe()
    }

    fn observe_all(&self) -> watch::Receiver<Vec<DownloadTask>> {
        self.all_tx.subscribe()
    }

    fn observe_active_downloads(&self) -> watch::Receiver<Vec<DownloadTask>> {
        self.active_tx.subscribe()
    }

    async fn update_status(&self, task_id: TaskId, status: DownloadStatus) -> Result<()> {
        self.mutate(task_id, |row| row.status = status)?;
        self.persist().await
    }

    fn update_progress(&self, task_id: TaskId, bytes_downloaded: u64, total_bytes: u64) -> bool {
        let mut table = self.table.lock();
        let Some(index) = table.position(task_id) else {
            return false;
        };
        let row = &mut table.rows[index];
        if row.status != DownloadStatus::Downloading {
            return false;
        }
        let before = whole_percent(row.progress);
        if !row.advance(bytes_downloaded, total_bytes) {
            return false;
        }
        let crossed_percent = whole_percent(row.progress) != before;
        table.notify_task(task_id);
        if crossed_percent {
            self.publish(&table);
        }
        true
    }

    async fn delete_by_status(&self, status: DownloadStatus) -> Result<usize> {
        let removed = {
            let mut table = self.table.lock();
            let before = table.rows.len();
            let removed_ids: Vec<TaskId> = table
                .rows
                .iter()
                .filter(|t| t.status == status)
                .map(|t| t.task_id)
                .collect();
            table.rows.retain(|t| t.status != status);
            for task_id in removed_ids {
                if let Some(tx) = table.watchers.remove(&task_id) {
                    tx.send_replace(None);
                }
            }
            self.publish(&table);
            before - table.rows.len()
        };
        self.persist().await?;
        Ok(removed)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_percent(progress: f32) -> u8 {
    (progress.clamp(0.0, 1.0) * 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn downloading(model_id: &str, total: u64) -> DownloadTask {
        let mut task = DownloadTask::queued(model_id, total);
        task.status = DownloadStatus::Downloading;
        task
    }

    #[tokio::test]
    async fn test_insert_and_query() {
        let store = MemoryTaskStore::new();
        let first = DownloadTask::queued("a", 10);
        let second = DownloadTask::queued("b", 10);
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();

        assert!(store.insert(first.clone()).await.is_err());
        assert_eq!(store.get_by_id(first.task_id).unwrap().model_id, "a");
        assert_eq!(store.get_by_model("b").len(), 1);

        let queued = store.get_by_status(DownloadStatus::Queued);
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].task_id, first.task_id);
        assert_eq!(queued[1].task_id, second.task_id);
    }

    #[tokio::test]
    async fn test_progress_only_while_downloading() {
        let store = MemoryTaskStore::new();
        let queued = DownloadTask::queued("a", 100);
        store.insert(queued.clone()).await.unwrap();
        assert!(!store.update_progress(queued.task_id, 50, 100));

        let active = downloading("b", 100);
        store.insert(active.clone()).await.unwrap();
        assert!(store.update_progress(active.task_id, 50, 100));
        assert!(!store.update_progress(active.task_id, 40, 100));
        assert!(store.update_progress(active.task_id, 500, 100));

        let row = store.get_by_id(active.task_id).unwrap();
        assert_eq!(row.bytes_downloaded, 100);
        assert!((row.progress - 1.0).abs() < f32::EPSILON);

        store
            .update_status(active.task_id, DownloadStatus::Paused)
            .await
            .unwrap();
        let paused = store.get_by_id(active.task_id).unwrap();
        assert_eq!(paused.status, DownloadStatus::Paused);
    }

    #[tokio::test]
    async fn test_observers_receive_updates() {
        let store = MemoryTaskStore::new();
        let task = downloading("a", 200);
        let mut active = store.observe_active_downloads();

        store.insert(task.clone()).await.unwrap();
        let mut by_id = store.observe_by_id(task.task_id);
        assert_eq!(by_id.borrow().as_ref().unwrap().task_id, task.task_id);
        active.changed().await.unwrap();
        assert_eq!(active.borrow().len(), 1);

        store.update_progress(task.task_id, 100, 200);
        by_id.changed().await.unwrap();
        assert_eq!(by_id.borrow().as_ref().unwrap().bytes_downloaded, 100);
    }

    #[tokio::test]
    async fn test_delete_by_status() {
        let store = MemoryTaskStore::new();
        let mut failed = DownloadTask::queued("a", 10);
        failed.status = DownloadStatus::Failed;
        store.insert(failed.clone()).await.unwrap();
        store.insert(DownloadTask::queued("b", 10)).await.unwrap();
        let watcher = store.observe_by_id(failed.task_id);

        let removed = store.delete_by_status(DownloadStatus::Failed).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_by_id(failed.task_id).is_none());
        assert!(watcher.borrow().is_none());
        assert_eq!(store.get_all().len(), 1);
    }

    #[tokio::test]
    async fn test_observing_unknown_or_dropped_ids_keeps_no_watchers() {
        let store = MemoryTaskStore::new();
        for _ in 0..3 {
            let unknown = store.observe_by_id(TaskId::new_v4());
            assert!(unknown.borrow().is_none());
        }
        assert!(store.table.lock().watchers.is_empty());

        let task = downloading("a", 10);
        store.insert(task.clone()).await.unwrap();
        let watcher = store.observe_by_id(task.task_id);
        assert_eq!(store.table.lock().watchers.len(), 1);

        drop(watcher);
        let other = downloading("b", 10);
        store.insert(other.clone()).await.unwrap();
        let _other = store.observe_by_id(other.task_id);
        let table = store.table.lock();
        assert_eq!(table.watchers.len(), 1);
        assert!(table.watchers.contains_key(&other.task_id));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_keeps_progress_on_status_change() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = JsonSnapshot::new(temp_dir.path().join("tasks.json"));
        let task = downloading("a", 100);
        {
            let store = MemoryTaskStore::open(snapshot.clone()).unwrap();
            store.insert(task.clone()).await.unwrap();
            store.update_progress(task.task_id, 30, 100);
            store
                .update_status(task.task_id, DownloadStatus::Paused)
                .await
                .unwrap();
        }

        let reopened = MemoryTaskStore::open(snapshot).unwrap();
        let row = reopened.get_by_id(task.task_id).unwrap();
        assert_eq!(row.status, DownloadStatus::Paused);
        assert_eq!(row.bytes_downloaded, 30);
    }
}
