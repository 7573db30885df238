use std::io;
use std::path::{Path, PathBuf};

/// On-disk locations of a model's artifacts
///
/// ```text
/// <models_dir>/<model_id>.bin       verified artifact
/// <models_dir>/<model_id>.tmp       partial transfer
/// <models_dir>/<model_id>.metadata  sidecar metadata
/// <models_dir>/<model_id>/          unpacked contents
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    models_dir: PathBuf,
}

impl ArtifactLayout {
    #[must_use]
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    #[must_use]
    pub fn artifact_path(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(format!("{model_id}.bin"))
    }

    #[must_use]
    pub fn partial_path(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(format!("{model_id}.tmp"))
    }

    #[must_use]
    pub fn metadata_path(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(format!("{model_id}.metadata"))
    }

    #[must_use]
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        self.models_dir.join(model_id)
    }

    /// Remove every artifact of `model_id`, returning how many entries were deleted
    ///
    /// Missing files are skipped. Other failures are logged and the remaining
    /// paths are still attempted.
    pub async fn delete_all(&self, model_id: &str) -> usize {
        let mut removed = 0;
        for path in [
            self.artifact_path(model_id),
            self.partial_path(model_id),
            self.metadata_path(model_id),
        ] {
            if remove_if_exists(&path).await {
                removed += 1;
            }
        }

        let dir = self.model_dir(model_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {e}", dir.display()),
        }

        removed
    }

    /// Remove the partial transfer file of `model_id`
    pub async fn delete_partial(&self, model_id: &str) -> bool {
        remove_if_exists(&self.partial_path(model_id)).await
    }
}

async fn remove_if_exists(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {e}", path.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_delete_all() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(temp_dir.path());
        std::fs::write(layout.artifact_path("gemma"), b"bin").unwrap();
        std::fs::write(layout.partial_path("gemma"), b"tmp").unwrap();
        std::fs::create_dir_all(layout.model_dir("gemma").join("nested")).unwrap();
        std::fs::write(layout.artifact_path("other"), b"keep").unwrap();

        assert_eq!(layout.delete_all("gemma").await, 3);
        assert!(!layout.artifact_path("gemma").exists());
        assert!(!layout.model_dir("gemma").exists());
        assert!(layout.artifact_path("other").exists());

        assert_eq!(layout.delete_all("gemma").await, 0);
    }
}
