use crate::error::{DepotError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// JSON file mirrored atomically (tmp + rename)
#[derive(Debug, Clone)]
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, returning the default value if the file doesn't exist
    pub fn load<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if !self.path.exists() {
            return Ok(T::default());
        }

        let content = fs::read_to_string(&self.path)?;

        serde_json::from_str(&content).map_err(|e| {
            DepotError::Store(format!(
                "Failed to parse snapshot {}: {e}",
                self.path.display()
            ))
        })
    }

    /// Save the snapshot atomically
    pub async fn save<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let content = serde_json::to_vec_pretty(value)
            .map_err(|e| DepotError::Store(format!("Failed to serialize snapshot: {e}")))?;

        tokio::fs::write(&tmp_path, content).await?;

        // Atomic rename
        tokio::fs::rename(&tmp_path, &self.path).await?;

        Ok(())
    }
}
