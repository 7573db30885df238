use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::model::DownloadStatus;

/// Default retry hint attached to failed transfers
pub const TRANSFER_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Upper bound for retry hints supplied by remote services
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Main error type for modeldepot
#[derive(Error, Debug)]
pub enum DepotError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogLoadError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Integrity mismatch for '{model_id}': {reason}\n\nThe artifact was deleted. Retrying will re-resolve the manifest before downloading again.")]
    Integrity { model_id: String, reason: String },

    #[error("Transfer error: {message}\n\nTroubleshooting:\n- Check internet connection\n- Retry the download; partial data is resumed when the server allows it")]
    Transfer {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Not enough disk space: {required_mb} MB required, {available_mb} MB available")]
    DiskSpace { required_mb: u64, available_mb: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} task {task_id} while it is {status}")]
    InvalidTransition {
        task_id: Uuid,
        status: DownloadStatus,
        action: &'static str,
    },

    #[error("Model '{model_id}' already has an active download task {task_id}")]
    ActiveTaskExists { model_id: String, task_id: Uuid },

    #[error("Model '{0}' is in use by an active session\n\nClose the conversation using it and try again.")]
    ModelInUse(String),

    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/modeldepot/config.toml\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Failures while loading a catalog from a bundled asset or a remote listing
#[derive(Error, Debug)]
pub enum CatalogLoadError {
    #[error("catalog source not found: {0}")]
    Missing(String),

    #[error("catalog is malformed: {0}")]
    Malformed(String),

    #[error("catalog entry #{index} has no identifier")]
    MissingIdentifier { index: usize },

    #[error("failed to fetch catalog listing: {0}")]
    Network(String),
}

/// Failures while resolving or reporting on a download manifest
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to fetch manifest for '{model_id}': {message}")]
    Fetch {
        model_id: String,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("manifest for '{model_id}' is malformed: {message}")]
    Malformed { model_id: String, message: String },

    #[error("manifest request for '{model_id}' was rejected (HTTP {status}): {message}")]
    Rejected {
        model_id: String,
        status: u16,
        message: String,
    },

    #[error("unsupported manifest locator '{0}'")]
    UnsupportedLocator(String),

    #[error("verification report for '{model_id}' deferred by server")]
    Deferred {
        model_id: String,
        retry_after: Option<Duration>,
    },
}

/// Error taxonomy used to decide how a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network and I/O failures, parse errors, stale cache: retry is allowed
    Recoverable,
    /// Contract violations: the operation is aborted
    Fatal,
    /// Checksum or signature mismatch: artifact deleted, manifest must be re-resolved
    Integrity,
}

impl DepotError {
    /// Classify the error
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Integrity { .. } => ErrorClass::Integrity,
            Self::Catalog(CatalogLoadError::MissingIdentifier { .. })
            | Self::Manifest(ManifestError::Rejected { .. } | ManifestError::UnsupportedLocator(_))
            | Self::InvalidTransition { .. }
            | Self::ActiveTaskExists { .. }
            | Self::Config(_)
            | Self::Store(_)
            | Self::Other(_) => ErrorClass::Fatal,
            Self::Catalog(_)
            | Self::Manifest(_)
            | Self::Transfer { .. }
            | Self::DiskSpace { .. }
            | Self::NotFound(_)
            | Self::ModelInUse(_)
            | Self::Io(_) => ErrorClass::Recoverable,
        }
    }

    /// Whether a task failing with this error may be retried
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        !matches!(self.class(), ErrorClass::Fatal)
    }

    /// Optional hint for how long to wait before retrying
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transfer { retry_after, .. }
            | Self::Manifest(
                ManifestError::Fetch { retry_after, .. } | ManifestError::Deferred { retry_after, .. },
            ) => *retry_after,
            Self::Integrity { .. } => Some(TRANSFER_RETRY_AFTER),
            _ => None,
        }
    }

    pub(crate) fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retry_after: Some(TRANSFER_RETRY_AFTER),
        }
    }
}

/// Clamp a server-provided retry hint to the accepted range
#[must_use]
pub fn clamp_retry_after(seconds: u64) -> Duration {
    Duration::from_secs(seconds).min(MAX_RETRY_AFTER)
}

pub type Result<T> = std::result::Result<T, DepotError>;
