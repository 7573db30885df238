//! Manifest resolution and artifact verification
//!
//! A package's `manifest_url` is either a direct HTTP manifest or a hub
//! locator (`hf://owner/repo?artifact=...&revision=...`). Direct manifests are
//! fetched, validated and cached per `(model_id, version)`; hub locators are
//! turned into download URLs by templating. Downloaded bytes are checked with
//! [`verify`] (SHA-256) and, when the manifest carries one, an Ed25519ph
//! signature.

pub mod cache;
pub mod credentials;
pub mod locator;
pub mod resolver;
pub mod signature;
pub mod verify;

pub use cache::ManifestCache;
pub use credentials::{CredentialProvider, EnvCredentialProvider, NoCredentials};
pub use locator::ManifestLocator;
pub use resolver::{
    http_client, parse_manifest_payload, ManifestProvider, ManifestResolver, ResolvedManifest,
    VerificationOutcome, VerificationReport,
};
pub use signature::{Ed25519Verifier, SignatureVerifier};
pub use verify::{compute_sha256, verify};
