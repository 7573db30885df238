use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::{Checksum, DownloadStatus, TaskId};

/// Runtime that executes a model once installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderType {
    MediaPipe,
    Tflite,
    MlcLlm,
    OnnxRuntime,
    Leap,
    CloudApi,
}

/// How the model's bytes reach the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryType {
    LocalArchive,
    PlayAsset,
    CloudFallback,
}

/// Lifecycle phase of a package on this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallState {
    NotInstalled,
    Queued,
    Downloading,
    Paused,
    Installed,
    Error,
}

impl InstallState {
    /// Derive a package's install state from its latest task status
    #[must_use]
    pub const fn from_task_status(status: DownloadStatus) -> Self {
        match status {
            DownloadStatus::Queued => Self::Queued,
            DownloadStatus::Downloading => Self::Downloading,
            DownloadStatus::Paused => Self::Paused,
            DownloadStatus::Failed => Self::Error,
            DownloadStatus::Cancelled => Self::NotInstalled,
            DownloadStatus::Completed => Self::Installed,
        }
    }
}

impl From<DownloadStatus> for InstallState {
    fn from(status: DownloadStatus) -> Self {
        Self::from_task_status(status)
    }
}

macro_rules! upper_snake_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($ty))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

upper_snake_enum!(ProviderType {
    MediaPipe => "MEDIA_PIPE",
    Tflite => "TFLITE",
    MlcLlm => "MLC_LLM",
    OnnxRuntime => "ONNX_RUNTIME",
    Leap => "LEAP",
    CloudApi => "CLOUD_API",
});

upper_snake_enum!(DeliveryType {
    LocalArchive => "LOCAL_ARCHIVE",
    PlayAsset => "PLAY_ASSET",
    CloudFallback => "CLOUD_FALLBACK",
});

upper_snake_enum!(InstallState {
    NotInstalled => "NOT_INSTALLED",
    Queued => "QUEUED",
    Downloading => "DOWNLOADING",
    Paused => "PAUSED",
    Installed => "INSTALLED",
    Error => "ERROR",
});

/// An installable model known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPackage {
    pub model_id: String,
    pub display_name: String,
    pub version: String,
    pub provider_type: ProviderType,
    pub delivery_type: DeliveryType,
    pub min_app_version: u32,
    pub size_bytes: u64,
    pub capabilities: BTreeSet<String>,
    pub install_state: InstallState,
    pub download_task_id: Option<TaskId>,
    pub manifest_url: String,
    pub checksum_sha256: Option<Checksum>,
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelPackage {
    /// Merge an incoming catalog definition into this persisted record
    ///
    /// Locally owned fields (install state, task link, integrity metadata
    /// already present, creation time) survive; descriptive fields come from
    /// `incoming`, and `updated_at` is the later of the two.
    ///
    /// Integrity metadata belongs to one artifact: when the version or
    /// manifest location changes, the persisted digest and signature are
    /// dropped in favour of whatever `incoming` carries.
    #[must_use]
    pub fn merged_with(&self, incoming: Self) -> Self {
        let same_artifact =
            self.version == incoming.version && self.manifest_url == incoming.manifest_url;
        let (checksum_sha256, signature) = if same_artifact {
            (
                self.checksum_sha256.clone().or(incoming.checksum_sha256),
                self.signature
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .or(incoming.signature),
            )
        } else {
            (incoming.checksum_sha256, incoming.signature)
        };
        Self {
            install_state: self.install_state,
            download_task_id: self.download_task_id,
            checksum_sha256,
            signature,
            created_at: self.created_at,
            updated_at: self.updated_at.max(incoming.updated_at),
            ..incoming
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn package(id: &str) -> ModelPackage {
        let now = Utc::now();
        ModelPackage {
            model_id: id.to_string(),
            display_name: format!("{id} display"),
            version: "1.0.0".to_string(),
            provider_type: ProviderType::MediaPipe,
            delivery_type: DeliveryType::LocalArchive,
            min_app_version: 1,
            size_bytes: 1024,
            capabilities: BTreeSet::from(["chat".to_string()]),
            install_state: InstallState::NotInstalled,
            download_task_id: None,
            manifest_url: format!("https://example.com/{id}"),
            checksum_sha256: None,
            signature: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_install_state_mapping() {
        assert_eq!(
            InstallState::from(DownloadStatus::Queued),
            InstallState::Queued
        );
        assert_eq!(
            InstallState::from(DownloadStatus::Failed),
            InstallState::Error
        );
        assert_eq!(
            InstallState::from(DownloadStatus::Cancelled),
            InstallState::NotInstalled
        );
        assert_eq!(
            InstallState::from(DownloadStatus::Completed),
            InstallState::Installed
        );
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(
            "media_pipe".parse::<ProviderType>().unwrap(),
            ProviderType::MediaPipe
        );
        assert_eq!(
            "LOCAL_ARCHIVE".parse::<DeliveryType>().unwrap(),
            DeliveryType::LocalArchive
        );
        assert!("quantum".parse::<ProviderType>().is_err());
        assert_eq!(InstallState::Installed.to_string(), "INSTALLED");
    }

    #[test]
    fn test_merge_keeps_local_fields() {
        let task_id = uuid::Uuid::new_v4();
        let checksum = Checksum::parse(&"a".repeat(64)).unwrap();
        let mut persisted = package("gemma");
        persisted.install_state = InstallState::Installed;
        persisted.download_task_id = Some(task_id);
        persisted.checksum_sha256 = Some(checksum.clone());
        persisted.updated_at = Utc::now() + Duration::hours(1);

        let mut incoming = package("gemma");
        incoming.display_name = "Gemma 2".to_string();
        incoming.size_bytes = 4096;
        incoming.capabilities = BTreeSet::from(["chat".to_string(), "vision".to_string()]);
        incoming.checksum_sha256 = Some(Checksum::parse(&"b".repeat(64)).unwrap());

        let merged = persisted.merged_with(incoming);
        assert_eq!(merged.install_state, InstallState::Installed);
        assert_eq!(merged.download_task_id, Some(task_id));
        assert_eq!(merged.checksum_sha256, Some(checksum));
        assert_eq!(merged.display_name, "Gemma 2");
        assert_eq!(merged.size_bytes, 4096);
        assert_eq!(merged.capabilities.len(), 2);
        assert_eq!(merged.updated_at, persisted.updated_at);
        assert_eq!(merged.created_at, persisted.created_at);
    }

    #[test]
    fn test_merge_adopts_missing_integrity_metadata() {
        let persisted = package("phi");
        let mut incoming = package("phi");
        incoming.checksum_sha256 = Some(Checksum::parse(&"c".repeat(64)).unwrap());
        incoming.signature = Some("sig".to_string());
        incoming.updated_at = persisted.updated_at + Duration::minutes(5);

        let merged = persisted.merged_with(incoming.clone());
        assert_eq!(merged.checksum_sha256, incoming.checksum_sha256);
        assert_eq!(merged.signature.as_deref(), Some("sig"));
        assert_eq!(merged.updated_at, incoming.updated_at);
    }

    #[test]
    fn test_merge_drops_integrity_metadata_of_previous_artifact() {
        let mut persisted = package("phi");
        persisted.checksum_sha256 = Some(Checksum::parse(&"d".repeat(64)).unwrap());
        persisted.signature = Some("old-sig".to_string());

        let mut bumped = package("phi");
        bumped.version = "2.0.0".to_string();
        let merged = persisted.merged_with(bumped);
        assert!(merged.checksum_sha256.is_none());
        assert!(merged.signature.is_none());

        let mut moved = package("phi");
        moved.manifest_url = "https://example.com/phi?revision=v2".to_string();
        moved.signature = Some("new-sig".to_string());
        let merged = persisted.merged_with(moved);
        assert!(merged.checksum_sha256.is_none());
        assert_eq!(merged.signature.as_deref(), Some("new-sig"));
    }
}
