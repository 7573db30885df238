use reqwest::Url;

use crate::error::ManifestError;

/// Scheme of hub-style locators
pub const HUB_SCHEME: &str = "hf";

/// Parsed form of a package's `manifest_url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocator {
    /// Manifest document fetched over HTTP(S)
    Direct(Url),
    /// Artifact hosted on a model hub, resolved by URL templating
    Hub {
        repository: String,
        artifact_path: String,
        revision: String,
    },
}

impl ManifestLocator {
    /// Parse `manifest_url`, using `fallback_revision` when a hub locator names none
    ///
    /// Hub locators look like `hf://<owner>/<repo>?artifact=<path>&revision=<rev>`.
    pub fn parse(manifest_url: &str, fallback_revision: &str) -> Result<Self, ManifestError> {
        let unsupported = || ManifestError::UnsupportedLocator(manifest_url.to_string());
        let url = Url::parse(manifest_url.trim()).map_err(|_| unsupported())?;

        match url.scheme() {
            "http" | "https" => Ok(Self::Direct(url)),
            HUB_SCHEME => {
                let owner = url.host_str().unwrap_or_default();
                let repository = format!("{owner}{}", url.path())
                    .trim_matches('/')
                    .to_string();
                if owner.is_empty() || repository.is_empty() {
                    return Err(unsupported());
                }

                let query_value = |key: &str| {
                    url.query_pairs()
                        .find(|(k, _)| k == key)
                        .map(|(_, v)| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                };
                let artifact_path = query_value("artifact")
                    .map(|p| p.trim_start_matches('/').to_string())
                    .filter(|p| !p.is_empty())
                    .ok_or_else(unsupported)?;
                let revision =
                    query_value("revision").unwrap_or_else(|| fallback_revision.to_string());

                Ok(Self::Hub {
                    repository,
                    artifact_path,
                    revision,
                })
            }
            _ => Err(unsupported()),
        }
    }

    #[must_use]
    pub const fn is_hub(&self) -> bool {
        matches!(self, Self::Hub { .. })
    }

    /// Canonical download URL of a hub artifact on `hub_base_url`
    #[must_use]
    pub fn hub_download_url(&self, hub_base_url: &str) -> Option<String> {
        match self {
            Self::Direct(_) => None,
            Self::Hub {
                repository,
                artifact_path,
                revision,
            } => Some(format!(
                "{}/{repository}/resolve/{revision}/{artifact_path}?download=1",
                hub_base_url.trim_end_matches('/')
            )),
        }
    }
}
