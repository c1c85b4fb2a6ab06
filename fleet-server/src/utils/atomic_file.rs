//! Crash-safe JSON persistence.
//!
//! Documents are written to a sibling temporary file, flushed, and renamed over
//! the target, so readers only ever observe the old or the new document.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".into());
    let tmp_name = format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4().simple());
    path.with_file_name(tmp_name)
}

/// Serialize `value` and atomically replace `path` with it.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    let tmp = temp_path_for(path);

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(anyhow::anyhow!("Failed to write {}: {}", path.display(), e));
    }
    Ok(())
}

/// Read a JSON document, yielding `T::default()` when it is missing or unreadable.
pub async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read document, using defaults");
            }
            return T::default();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt document, using defaults");
            T::default()
        }
    }
}
