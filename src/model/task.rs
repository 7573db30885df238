use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a download task
pub type TaskId = Uuid;

/// Status of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Failed,
    Cancelled,
    Completed,
}

impl DownloadStatus {
    /// Statuses that count against the one-active-task-per-model invariant
    pub const ACTIVE: [Self; 3] = [Self::Queued, Self::Downloading, Self::Paused];

    /// COMPLETED and CANCELLED never transition again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Downloading | Self::Paused)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Downloading => "DOWNLOADING",
            Self::Paused => "PAUSED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "DOWNLOADING" => Ok(Self::Downloading),
            "PAUSED" => Ok(Self::Paused),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(format!("unknown download status: {other}")),
        }
    }
}

/// A single attempt at fetching a model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub task_id: TaskId,
    pub model_id: String,
    pub status: DownloadStatus,
    pub progress: f32,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub can_retry: bool,
}

impl DownloadTask {
    /// New task in QUEUED
    #[must_use]
    pub fn queued(model_id: &str, total_bytes: u64) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            model_id: model_id.to_string(),
            status: DownloadStatus::Queued,
            progress: 0.0,
            bytes_downloaded: 0,
            total_bytes,
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
            can_retry: false,
        }
    }

    /// Progress fraction for `bytes` of `total`, clamped to [0, 1]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(bytes: u64, total: u64) -> f32 {
        if total == 0 {
            return 0.0;
        }
        (bytes as f64 / total as f64).clamp(0.0, 1.0) as f32
    }

    /// Apply a progress sample without ever moving backwards
    ///
    /// Bytes are clamped to `[0, total_bytes]` when the total is known.
    /// Returns `true` when the task changed.
    pub fn advance(&mut self, bytes_downloaded: u64, total_bytes: u64) -> bool {
        if total_bytes > 0 && self.total_bytes != total_bytes {
            self.total_bytes = total_bytes;
        }
        let clamped = if self.total_bytes > 0 {
            bytes_downloaded.min(self.total_bytes)
        } else {
            bytes_downloaded
        };
        if clamped <= self.bytes_downloaded {
            return false;
        }
        self.bytes_downloaded = clamped;
        self.progress = Self::fraction(clamped, self.total_bytes).max(self.progress);
        true
    }

    /// Clear attempt data ahead of a retry
    pub fn reset_for_retry(&mut self) {
        self.status = DownloadStatus::Queued;
        self.progress = 0.0;
        self.bytes_downloaded = 0;
        self.error_message = None;
        self.can_retry = false;
        self.finished_at = None;
        self.started_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_active() {
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Cancelled.is_terminal());
        assert!(!DownloadStatus::Failed.is_terminal());
        assert!(!DownloadStatus::Failed.is_active());
        for status in DownloadStatus::ACTIVE {
            assert!(status.is_active());
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn test_advance_is_monotonic_and_clamped() {
        let mut task = DownloadTask::queued("gemma", 1000);
        assert!(task.advance(250, 1000));
        assert!((task.progress - 0.25).abs() < f32::EPSILON);

        assert!(!task.advance(100, 1000));
        assert_eq!(task.bytes_downloaded, 250);

        assert!(task.advance(5000, 1000));
        assert_eq!(task.bytes_downloaded, 1000);
        assert!((task.progress - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_advance_unknown_total() {
        let mut task = DownloadTask::queued("gemma", 0);
        assert!(task.advance(512, 0));
        assert_eq!(task.bytes_downloaded, 512);
        assert!(task.progress.abs() < f32::EPSILON);
    }

    #[test]
    fn test_reset_for_retry() {
        let mut task = DownloadTask::queued("gemma", 100);
        task.status = DownloadStatus::Failed;
        task.advance(40, 100);
        task.error_message = Some("boom".into());
        task.can_retry = true;
        task.finished_at = Some(Utc::now());

        task.reset_for_retry();
        assert_eq!(task.status, DownloadStatus::Queued);
        assert_eq!(task.bytes_downloaded, 0);
        assert!(task.progress.abs() < f32::EPSILON);
        assert!(task.error_message.is_none());
        assert!(task.finished_at.is_none());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "failed".parse::<DownloadStatus>().unwrap(),
            DownloadStatus::Failed
        );
        assert!("done".parse::<DownloadStatus>().is_err());
    }
}
