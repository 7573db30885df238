use std::path::Path;

use crate::error::{DepotError, Result};

const MB: u64 = 1_024 * 1_024;

/// Check that `dir` can take `required_bytes` while keeping `headroom_mb` free
pub fn check_disk_space(dir: &Path, required_bytes: u64, headroom_mb: u64) -> Result<()> {
    // Get filesystem stats for models directory
    let stats = nix::sys::statvfs::statvfs(dir)
        .map_err(|e| DepotError::Other(format!("Failed to check disk space: {e}")))?;

    #[allow(clippy::unnecessary_cast)]
    let available_bytes = stats.blocks_available() as u64 * stats.fragment_size() as u64;
    let required_with_headroom = required_bytes.saturating_add(headroom_mb * MB);

    if available_bytes < required_with_headroom {
        return Err(DepotError::DiskSpace {
            required_mb: required_with_headroom.div_ceil(MB),
            available_mb: available_bytes / MB,
        });
    }

    Ok(())
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1_572_864), "1.50 MB");
        assert_eq!(format_bytes(1_610_612_736), "1.50 GB");
    }

    #[test]
    fn test_disk_space() {
        let temp_dir = TempDir::new().unwrap();
        assert!(check_disk_space(temp_dir.path(), 1, 0).is_ok());

        let err = check_disk_space(temp_dir.path(), u64::MAX / 2, 0).unwrap_err();
        assert!(matches!(err, DepotError::DiskSpace { .. }));
        assert!(err.can_retry());
    }
}
