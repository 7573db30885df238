//! Persistent stores for download tasks and catalog packages.
//!
//! Both stores are seams: the engine talks to [`TaskRepository`] and
//! [`PackageRepository`] and never to a concrete backend. The bundled
//! implementations keep rows in memory, publish changes over
//! `tokio::sync::watch` channels and optionally mirror every structural change
//! to a JSON snapshot on disk.

pub mod packages;
pub mod snapshot;
pub mod tasks;

pub use packages::{MemoryPackageStore, PackageRepository};
pub use snapshot::JsonSnapshot;
pub use tasks::{MemoryTaskStore, TaskRepository};
