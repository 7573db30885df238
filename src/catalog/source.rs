use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::CatalogLoadError;
use crate::model::{Checksum, DeliveryType, InstallState, ModelPackage, ProviderType};

/// Where a catalog listing comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// JSON document shipped alongside the binary
    Bundled(PathBuf),
    /// Remote listing serving the same document over HTTP
    Remote(String),
}

impl std::fmt::Display for CatalogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bundled(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default = "default_document_version")]
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    models: Vec<CatalogEntry>,
}

fn default_document_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    id: String,
    display_name: String,
    version: String,
    provider: String,
    delivery: String,
    #[serde(default = "default_min_app_version")]
    min_app_version: u32,
    size_bytes: u64,
    #[serde(default)]
    capabilities: Vec<String>,
    manifest_url: String,
    checksum_sha256: Option<String>,
    signature: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

fn default_min_app_version() -> u32 {
    1
}

impl CatalogEntry {
    fn into_package(
        self,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<ModelPackage, CatalogLoadError> {
        let model_id = self.id.trim().to_string();
        if model_id.is_empty() {
            return Err(CatalogLoadError::MissingIdentifier { index });
        }

        let provider_type: ProviderType = self
            .provider
            .parse()
            .map_err(|e: String| CatalogLoadError::Malformed(format!("{model_id}: {e}")))?;
        let delivery_type: DeliveryType = self
            .delivery
            .parse()
            .map_err(|e: String| CatalogLoadError::Malformed(format!("{model_id}: {e}")))?;

        let checksum_sha256 = self
            .checksum_sha256
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(Checksum::parse)
            .transpose()
            .map_err(|e| CatalogLoadError::Malformed(format!("{model_id}: {e}")))?;

        let capabilities: BTreeSet<String> = self
            .capabilities
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        Ok(ModelPackage {
            display_name: self.display_name,
            version: self.version,
            provider_type,
            delivery_type,
            min_app_version: self.min_app_version,
            size_bytes: self.size_bytes,
            capabilities,
            install_state: InstallState::NotInstalled,
            download_task_id: None,
            manifest_url: self.manifest_url,
            checksum_sha256,
            signature: self.signature.filter(|s| !s.trim().is_empty()),
            created_at: parse_timestamp(&model_id, self.created_at.as_deref())?.unwrap_or(now),
            updated_at: parse_timestamp(&model_id, self.updated_at.as_deref())?.unwrap_or(now),
            model_id,
        })
    }
}

fn parse_timestamp(
    model_id: &str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, CatalogLoadError> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| {
                    CatalogLoadError::Malformed(format!("{model_id}: invalid timestamp '{raw}'"))
                })
        })
        .transpose()
}

/// Parse a catalog document into packages
///
/// Entries without timestamps are stamped with `now`.
pub fn parse_catalog(json: &str, now: DateTime<Utc>) -> Result<Vec<ModelPackage>, CatalogLoadError> {
    let document: CatalogDocument =
        serde_json::from_str(json).map_err(|e| CatalogLoadError::Malformed(e.to_string()))?;

    document
        .models
        .into_iter()
        .enumerate()
        .map(|(index, entry)| entry.into_package(index, now))
        .collect()
}

/// Load the catalog listing from `source`
pub async fn load_catalog(
    source: &CatalogSource,
    client: &reqwest::Client,
) -> Result<Vec<ModelPackage>, CatalogLoadError> {
    let body = match source {
        CatalogSource::Bundled(path) => match tokio::fs::read_to_string(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogLoadError::Missing(path.display().to_string()));
            }
            Err(e) => {
                return Err(CatalogLoadError::Malformed(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        },
        CatalogSource::Remote(url) => {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| CatalogLoadError::Network(e.to_string()))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(CatalogLoadError::Missing(url.clone()));
            }
            let response = response
                .error_for_status()
                .map_err(|e| CatalogLoadError::Network(e.to_string()))?;
            response
                .text()
                .await
                .map_err(|e| CatalogLoadError::Network(e.to_string()))?
        }
    };

    let packages = parse_catalog(&body, Utc::now())?;
    tracing::debug!("Loaded {} catalog entries from {source}", packages.len());
    Ok(packages)
}
