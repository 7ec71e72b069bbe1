//! Atomic JSON file helpers.

use reach_types::{ReachError, ReachResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple());
    path.with_file_name(tmp)
}

/// Serialize `value` and replace `path` with it in one rename.
///
/// Readers see either the old file or the new one, never a partial write.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> ReachResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = temp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ReachError::Io(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ReachError::Io(e));
    }
    debug!(path = %path.display(), bytes = bytes.len(), "State written");
    Ok(())
}

/// Read a JSON file. Missing files yield `None`; corrupt files are logged
/// and also yield `None`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match tokio::fs::read(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read state file, using defaults");
            return None;
        }
    };
    match serde_json::from_slice(&contents) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt state file, using defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("x.json");
        write_json_atomic(&path, &json!({"a": 1})).await.unwrap();
        let v: Option<serde_json::Value> = read_json(&path).await;
        assert_eq!(v, Some(json!({"a": 1})));

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        assert!(read_json::<serde_json::Value>(&path).await.is_none());
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_json::<serde_json::Value>(&path).await.is_none());
    }
}
