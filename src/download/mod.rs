//! Download engine
//!
//! [`DownloadOrchestrator`] drives each [`DownloadTask`](crate::model::DownloadTask)
//! through its lifecycle:
//!
//! ```text
//! QUEUED      -> DOWNLOADING (slot free) | PAUSED | CANCELLED
//! DOWNLOADING -> PAUSED | FAILED | CANCELLED | COMPLETED (after verification)
//! PAUSED      -> DOWNLOADING | QUEUED (no free slot) | CANCELLED
//! FAILED      -> QUEUED (retry) | CANCELLED
//! ```
//!
//! Byte transfers run as cancellable jobs on a [`WorkQueue`] through an
//! [`ArtifactTransport`].

pub mod disk;
pub mod locks;
pub mod orchestrator;
pub mod transport;
pub mod work;

pub use disk::{check_disk_space, format_bytes};
pub use orchestrator::{DownloadOrchestrator, DownloadSettings, EngineParts, INTERRUPTED_MESSAGE};
pub use transport::{
    open_partial, ArtifactTransport, HttpTransport, ProgressFn, TransferOutcome, TransferRequest,
};
pub use work::{Job, TokioWorkQueue, WorkConstraints, WorkQueue};
