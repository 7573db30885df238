//! Shared data model for packages, download tasks and manifests.
//!
//! Install state is never stored independently of the task lifecycle: it is
//! derived from the status of the package's latest task via
//! [`InstallState::from_task_status`].

pub mod checksum;
pub mod manifest;
pub mod package;
pub mod task;

pub use checksum::Checksum;
pub use manifest::DownloadManifest;
pub use package::{DeliveryType, InstallState, ModelPackage, ProviderType};
pub use task::{DownloadStatus, DownloadTask, TaskId};
