//! Catalog of installable model packages
//!
//! Catalog listings come from a bundled JSON document or a remote listing
//! ([`load_catalog`]). [`CatalogStore`] merges them with persisted install
//! state and owns the narrow mutations issued by the download engine.

pub mod files;
pub mod source;
pub mod store;

pub use files::ArtifactLayout;
pub use source::{load_catalog, parse_catalog, CatalogSource};
pub use store::{CatalogReplaceSummary, CatalogStore, NoActiveSessions, SessionTracker};
