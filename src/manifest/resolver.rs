use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::cache::ManifestCache;
use super::credentials::CredentialProvider;
use super::locator::ManifestLocator;
use crate::catalog::CatalogStore;
use crate::config::schema::ManifestConfig;
use crate::error::{clamp_retry_after, DepotError, ManifestError, Result};
use crate::model::{Checksum, DownloadManifest};

/// Retry hint for server-side and network failures without an explicit one
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Manifest plus the credentials needed to fetch its artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedManifest {
    pub manifest: DownloadManifest,
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationOutcome {
    Success,
    Corrupted,
}

/// Verification result sent back to a catalog service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub model_id: String,
    pub version: String,
    pub checksum: Checksum,
    pub outcome: VerificationOutcome,
    pub failure_reason: Option<String>,
}

/// Resolves download parameters and accepts verification reports
#[async_trait]
pub trait ManifestProvider: Send + Sync {
    /// Resolve the manifest of `model_id` at `version`
    ///
    /// A cached manifest is reused unless it is stale or `force_refresh` is set.
    async fn resolve_manifest(
        &self,
        model_id: &str,
        version: &str,
        force_refresh: bool,
    ) -> Result<ResolvedManifest>;

    async fn report_verification(&self, report: VerificationReport) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ManifestPayload {
    #[serde(alias = "modelId")]
    model_id: String,
    version: String,
    #[serde(alias = "checksumSha256")]
    checksum_sha256: String,
    #[serde(alias = "sizeBytes")]
    size_bytes: u64,
    #[serde(alias = "downloadUrl")]
    download_url: String,
    signature: Option<String>,
    #[serde(alias = "publicKeyUrl")]
    public_key_url: Option<String>,
    #[serde(alias = "expiresAt")]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
    #[serde(alias = "retryAfterSeconds")]
    retry_after_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct VerificationRequest<'a> {
    version: &'a str,
    checksum_sha256: &'a str,
    status: VerificationOutcome,
    failure_reason: Option<&'a str>,
    verified_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum VerificationResponseStatus {
    Accepted,
    Retry,
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    status: VerificationResponseStatus,
    #[serde(alias = "nextRetryAfterSeconds")]
    next_retry_after_seconds: Option<u64>,
}

/// Parse and validate a direct manifest document for `model_id` at `version`
pub fn parse_manifest_payload(
    model_id: &str,
    version: &str,
    body: &str,
    fetched_at: DateTime<Utc>,
) -> std::result::Result<DownloadManifest, ManifestError> {
    let malformed = |message: String| ManifestError::Malformed {
        model_id: model_id.to_string(),
        message,
    };

    let payload: ManifestPayload =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    if payload.model_id.trim().is_empty() {
        return Err(malformed("manifest missing model_id".into()));
    }
    if payload.version.trim().is_empty() {
        return Err(malformed("manifest missing version".into()));
    }
    if payload.model_id != model_id || payload.version != version {
        return Err(malformed(format!(
            "manifest describes {}@{}, expected {model_id}@{version}",
            payload.model_id, payload.version
        )));
    }
    let checksum =
        Checksum::parse(&payload.checksum_sha256).map_err(|e| malformed(e.to_string()))?;
    if payload.size_bytes == 0 {
        return Err(malformed("manifest size must be > 0".into()));
    }
    let https = reqwest::Url::parse(&payload.download_url)
        .map(|url| url.scheme() == "https")
        .unwrap_or(false);
    if !https {
        return Err(malformed("manifest download_url must be HTTPS".into()));
    }
    if payload
        .signature
        .as_deref()
        .is_some_and(|s| s.trim().is_empty())
    {
        return Err(malformed(
            "manifest signature must not be blank when provided".into(),
        ));
    }

    Ok(DownloadManifest {
        model_id: payload.model_id,
        version: payload.version,
        checksum_sha256: Some(checksum),
        size_bytes: payload.size_bytes,
        download_url: payload.download_url,
        signature: payload.signature,
        public_key_url: payload.public_key_url.filter(|u| !u.trim().is_empty()),
        expires_at: payload.expires_at,
        fetched_at,
    })
}

/// Build the shared HTTP client with the configured timeout
pub fn http_client(config: &ManifestConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.http_timeout())
        .user_agent(concat!("modeldepot/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DepotError::Other(format!("Failed to build HTTP client: {e}")))
}

/// HTTP-backed manifest provider
pub struct ManifestResolver {
    client: reqwest::Client,
    catalog: Arc<CatalogStore>,
    cache: ManifestCache,
    credentials: Arc<dyn CredentialProvider>,
    hub_base_url: String,
    verification_endpoint: Option<String>,
}

impl ManifestResolver {
    pub fn new(
        config: &ManifestConfig,
        client: reqwest::Client,
        catalog: Arc<CatalogStore>,
        cache: ManifestCache,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            client,
            catalog,
            cache,
            credentials,
            hub_base_url: config.hub_base_url.clone(),
            verification_endpoint: config.verification_endpoint.clone(),
        }
    }

    fn locator(&self, model_id: &str, version: &str) -> Result<ManifestLocator> {
        let package = self.catalog.require(model_id)?;
        Ok(ManifestLocator::parse(&package.manifest_url, version)?)
    }

    fn resolve_hub(&self, model_id: &str, version: &str, locator: &ManifestLocator) -> Result<ResolvedManifest> {
        let package = self.catalog.require(model_id)?;
        let download_url = locator
            .hub_download_url(&self.hub_base_url)
            .ok_or_else(|| ManifestError::UnsupportedLocator(package.manifest_url.clone()))?;
        tracing::debug!(model_id, %download_url, "Resolved hub locator");

        Ok(ResolvedManifest {
            manifest: DownloadManifest {
                model_id: model_id.to_string(),
                version: version.to_string(),
                checksum_sha256: package.checksum_sha256,
                // Hub listings only carry an approximate size
                size_bytes: 0,
                download_url,
                signature: None,
                public_key_url: None,
                expires_at: None,
                fetched_at: Utc::now(),
            },
            bearer_token: self.credentials.bearer_token(),
        })
    }

    async fn fetch_direct(
        &self,
        model_id: &str,
        version: &str,
        url: reqwest::Url,
    ) -> Result<DownloadManifest> {
        tracing::debug!(model_id, %url, "Fetching manifest");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(model_id, &e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| fetch_error(model_id, &e.to_string()))?;
        if !status.is_success() {
            return Err(http_error(model_id, status, &body).into());
        }

        let manifest = parse_manifest_payload(model_id, version, &body, Utc::now())?;
        self.cache.put(manifest.clone()).await?;
        self.catalog
            .update_integrity(
                model_id,
                manifest.checksum_sha256.clone(),
                manifest.signature.clone(),
            )
            .await?;
        Ok(manifest)
    }
}

#[async_trait]
impl ManifestProvider for ManifestResolver {
    async fn resolve_manifest(
        &self,
        model_id: &str,
        version: &str,
        force_refresh: bool,
    ) -> Result<ResolvedManifest> {
        let locator = self.locator(model_id, version)?;
        let url = match locator {
            ManifestLocator::Hub { .. } => return self.resolve_hub(model_id, version, &locator),
            ManifestLocator::Direct(url) => url,
        };

        if force_refresh {
            self.cache.invalidate(model_id).await?;
        } else if let Some(manifest) = self.cache.get_fresh(model_id, version, Utc::now()) {
            tracing::debug!(model_id, version, "Manifest cache hit");
            return Ok(ResolvedManifest {
                manifest,
                bearer_token: None,
            });
        }

        let manifest = self.fetch_direct(model_id, version, url).await?;
        tracing::info!(model_id, version, "Manifest resolved");
        Ok(ResolvedManifest {
            manifest,
            bearer_token: None,
        })
    }

    async fn report_verification(&self, report: VerificationReport) -> Result<()> {
        let model_id = report.model_id.as_str();
        if self.locator(model_id, &report.version)?.is_hub() {
            return Ok(());
        }
        let Some(template) = &self.verification_endpoint else {
            tracing::debug!(model_id, "No verification endpoint configured, skipping report");
            return Ok(());
        };
        let endpoint = template.replace("{model_id}", model_id);

        let request = VerificationRequest {
            version: &report.version,
            checksum_sha256: report.checksum.as_str(),
            status: report.outcome,
            failure_reason: report.failure_reason.as_deref(),
            verified_at: Utc::now().to_rfc3339(),
        };
        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| fetch_error(model_id, &e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| fetch_error(model_id, &e.to_string()))?;
        if !status.is_success() {
            return Err(http_error(model_id, status, &body).into());
        }

        let parsed: VerificationResponse =
            serde_json::from_str(&body).map_err(|e| ManifestError::Malformed {
                model_id: model_id.to_string(),
                message: format!("verification response: {e}"),
            })?;
        match parsed.status {
            VerificationResponseStatus::Accepted => Ok(()),
            VerificationResponseStatus::Retry => Err(ManifestError::Deferred {
                model_id: model_id.to_string(),
                retry_after: parsed.next_retry_after_seconds.map(clamp_retry_after),
            }
            .into()),
        }
    }
}

fn fetch_error(model_id: &str, message: &str) -> DepotError {
    ManifestError::Fetch {
        model_id: model_id.to_string(),
        message: message.to_string(),
        retry_after: Some(DEFAULT_RETRY_AFTER),
    }
    .into()
}

/// Map a non-success response onto the error taxonomy
///
/// Client errors are fatal; everything else is recoverable with a retry hint.
fn http_error(model_id: &str, status: reqwest::StatusCode, body: &str) -> ManifestError {
    let envelope: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
    let message = envelope
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| status.to_string());

    if status.is_client_error() {
        ManifestError::Rejected {
            model_id: model_id.to_string(),
            status: status.as_u16(),
            message,
        }
    } else {
        ManifestError::Fetch {
            model_id: model_id.to_string(),
            message,
            retry_after: Some(
                envelope
                    .and_then(|e| e.retry_after_seconds)
                    .map_or(DEFAULT_RETRY_AFTER, clamp_retry_after),
            ),
        }
    }
}
