//! Point-in-time zip archives of instance data directories.
//!
//! Operations on one instance are serialized through a per-instance lock;
//! different instances proceed independently.
//!
//! Restore protocol:
//! 1. stop the instance (best-effort)
//! 2. record a restore marker, then rename the live directory to a holding directory
//! 3. recreate an empty live directory
//! 4. extract the archive into it
//! 5. start the instance
//! 6. drop the holding directory and the marker
//!
//! If 3-5 fail, the live directory is removed, the holding directory renamed
//! back, and the instance started again. A marker that survives a failed
//! rollback flags the instance as needing operator attention. A crash during
//! 3-5 leaves the same evidence behind.

use crate::models::backup::{
    artifact_name_for, is_valid_artifact_name, parse_artifact_time, BackupArtifact, ARTIFACT_EXT,
};
use crate::services::lifecycle::LifecycleGateway;
use crate::utils::atomic_file::write_json_atomic;
use crate::utils::format::format_bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

const MARKER_PREFIX: &str = ".restore-";

#[derive(thiserror::Error, Debug)]
pub enum BackupError {
    #[error("Invalid backup name")]
    InvalidName,

    #[error("No data directory for instance {0}")]
    InstanceDataMissing(String),

    #[error("Backup not found")]
    NotFound,

    #[error("Failed to create backup: {0}")]
    Archive(String),

    #[error("Restore failed: {cause}{}", rollback_suffix(.rollback_error))]
    RestoreFailed {
        cause: String,
        /// Set when the rollback itself failed; the restore marker is kept.
        rollback_error: Option<String>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn rollback_suffix(rollback_error: &Option<String>) -> String {
    match rollback_error {
        Some(e) => format!(" (rollback failed: {}; previous data kept in holding directory)", e),
        None => String::new(),
    }
}

/// Written before the live directory is moved aside; removed once the instance
/// is back on a complete data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreMarker {
    pub instance: String,
    pub holding_dir: PathBuf,
    pub artifact: String,
    pub started: DateTime<Utc>,
}

pub struct BackupManager {
    data_dir: PathBuf,
    backups_dir: PathBuf,
    lifecycle: Arc<dyn LifecycleGateway>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BackupManager {
    pub fn new(
        data_dir: PathBuf,
        backups_dir: PathBuf,
        lifecycle: Arc<dyn LifecycleGateway>,
    ) -> Self {
        Self {
            data_dir,
            backups_dir,
            lifecycle,
            locks: DashMap::new(),
        }
    }

    pub fn instance_lock(&self, instance: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(instance.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn live_dir(&self, instance: &str) -> PathBuf {
        self.data_dir.join(instance)
    }

    fn backup_dir(&self, instance: &str) -> PathBuf {
        self.backups_dir.join(instance)
    }

    fn marker_path(&self, instance: &str) -> PathBuf {
        self.data_dir.join(format!("{}{}.json", MARKER_PREFIX, instance))
    }

    /// Archive the whole data directory into a new timestamp-named artifact.
    pub async fn create(&self, instance: &str) -> Result<BackupArtifact, BackupError> {
        let lock = self.instance_lock(instance);
        let _guard = lock.lock().await;

        let source = self.live_dir(instance);
        if !tokio::fs::metadata(&source).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(BackupError::InstanceDataMissing(instance.to_string()));
        }

        let dir = self.backup_dir(instance);
        tokio::fs::create_dir_all(&dir).await?;

        let mut ts = Utc::now();
        let mut name = artifact_name_for(ts);
        while tokio::fs::try_exists(dir.join(&name)).await.unwrap_or(false) {
            ts += chrono::Duration::milliseconds(1);
            name = artifact_name_for(ts);
        }

        let final_path = dir.join(&name);
        let partial_path = dir.join(format!(".{}.partial", name));

        let (src, dest) = (source.clone(), partial_path.clone());
        let archived = tokio::task::spawn_blocking(move || archive_directory(&src, &dest))
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .and_then(|r| r);

        if let Err(e) = archived {
            let _ = tokio::fs::remove_file(&partial_path).await;
            tracing::error!(instance, error = %e, "Backup archiving failed");
            return Err(BackupError::Archive(format!("{e:#}")));
        }
        tokio::fs::rename(&partial_path, &final_path).await?;

        let size_bytes = tokio::fs::metadata(&final_path).await?.len();
        tracing::info!(instance, backup = %name, size_bytes, "Backup created");
        Ok(BackupArtifact {
            name,
            size_bytes,
            size: format_bytes(size_bytes),
            created: ts,
        })
    }

    /// Artifacts newest first. A missing backup directory is an empty list.
    pub async fn list(&self, instance: &str) -> Result<Vec<BackupArtifact>, BackupError> {
        let dir = self.backup_dir(instance);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(ARTIFACT_EXT) || name.starts_with('.') {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let created = parse_artifact_time(&name)
                .or_else(|| meta.modified().ok().map(DateTime::<Utc>::from))
                .unwrap_or_else(Utc::now);
            artifacts.push(BackupArtifact {
                size_bytes: meta.len(),
                size: format_bytes(meta.len()),
                name,
                created,
            });
        }

        artifacts.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
        Ok(artifacts)
    }

    /// Path of an existing artifact, for streaming downloads.
    pub async fn artifact_path(
        &self,
        instance: &str,
        artifact: &str,
    ) -> Result<PathBuf, BackupError> {
        if !is_valid_artifact_name(artifact) {
            return Err(BackupError::InvalidName);
        }
        let path = self.backup_dir(instance).join(artifact);
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(path),
            _ => Err(BackupError::NotFound),
        }
    }

    pub async fn delete(&self, instance: &str, artifact: &str) -> Result<(), BackupError> {
        if !is_valid_artifact_name(artifact) {
            return Err(BackupError::InvalidName);
        }
        let lock = self.instance_lock(instance);
        let _guard = lock.lock().await;

        match tokio::fs::remove_file(self.backup_dir(instance).join(artifact)).await {
            Ok(()) => {
                tracing::info!(instance, backup = %artifact, "Backup deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackupError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the instance's data with the contents of `artifact`.
    pub async fn restore(&self, instance: &str, artifact: &str) -> Result<(), BackupError> {
        let lock = self.instance_lock(instance);
        let _guard = lock.lock().await;

        let archive = self.artifact_path(instance, artifact).await?;
        let live = self.live_dir(instance);
        let holding = self
            .data_dir
            .join(format!("{}.restore-{}", instance, uuid::Uuid::new_v4().simple()));
        let marker_path = self.marker_path(instance);

        tracing::info!(instance, backup = %artifact, "Starting restore");

        let stopped = self.lifecycle.stop(instance).await;
        if !stopped.ok {
            tracing::warn!(
                instance,
                error = %stopped.diagnostic(),
                "Stop before restore failed, continuing"
            );
        }

        let marker = RestoreMarker {
            instance: instance.to_string(),
            holding_dir: holding.clone(),
            artifact: artifact.to_string(),
            started: Utc::now(),
        };
        if let Err(e) = write_json_atomic(&marker_path, &marker).await {
            self.start_after_abort(instance).await;
            return Err(BackupError::RestoreFailed {
                cause: format!("failed to record restore marker: {e}"),
                rollback_error: None,
            });
        }

        let held = match tokio::fs::rename(&live, &holding).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                let _ = tokio::fs::remove_file(&marker_path).await;
                self.start_after_abort(instance).await;
                return Err(BackupError::RestoreFailed {
                    cause: format!("failed to move current data aside: {e}"),
                    rollback_error: None,
                });
            }
        };

        match self.populate_and_start(instance, &live, &archive).await {
            Ok(()) => {
                if held {
                    if let Err(e) = tokio::fs::remove_dir_all(&holding).await {
                        tracing::warn!(
                            instance,
                            holding = %holding.display(),
                            error = %e,
                            "Failed to remove holding directory"
                        );
                    }
                }
                self.clear_marker(&marker_path).await;
                tracing::info!(instance, backup = %artifact, "Restore completed");
                Ok(())
            }
            Err(cause) => {
                tracing::error!(
                    instance,
                    backup = %artifact,
                    error = %cause,
                    "Restore failed, rolling back"
                );
                let rollback = roll_back(&live, held.then_some(holding.as_path())).await;

                let started = self.lifecycle.start(instance).await;
                if !started.ok {
                    tracing::error!(
                        instance,
                        error = %started.diagnostic(),
                        "Failed to start instance after rollback"
                    );
                }

                match rollback {
                    Ok(()) => {
                        self.clear_marker(&marker_path).await;
                        Err(BackupError::RestoreFailed {
                            cause,
                            rollback_error: None,
                        })
                    }
                    Err(e) => {
                        tracing::error!(
                            instance,
                            holding = %holding.display(),
                            marker = %marker_path.display(),
                            error = %e,
                            "Rollback failed, data directory may be inconsistent"
                        );
                        Err(BackupError::RestoreFailed {
                            cause,
                            rollback_error: Some(e.to_string()),
                        })
                    }
                }
            }
        }
    }

    async fn populate_and_start(
        &self,
        instance: &str,
        live: &Path,
        archive: &Path,
    ) -> Result<(), String> {
        tokio::fs::create_dir_all(live)
            .await
            .map_err(|e| format!("failed to recreate data directory: {e}"))?;

        let (archive, dest) = (archive.to_path_buf(), live.to_path_buf());
        tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
            .await
            .map_err(|e| format!("extraction task failed: {e}"))?
            .map_err(|e| format!("failed to extract backup: {e:#}"))?;

        let started = self.lifecycle.start(instance).await;
        if !started.ok {
            return Err(format!("failed to start instance: {}", started.diagnostic()));
        }
        Ok(())
    }

    async fn start_after_abort(&self, instance: &str) {
        let started = self.lifecycle.start(instance).await;
        if !started.ok {
            tracing::error!(
                instance,
                error = %started.diagnostic(),
                "Failed to restart instance after aborted restore"
            );
        }
    }

    async fn clear_marker(&self, marker_path: &Path) {
        if let Err(e) = tokio::fs::remove_file(marker_path).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    marker = %marker_path.display(),
                    error = %e,
                    "Failed to remove restore marker"
                );
            }
        }
    }

    /// Restores that never reached a consistent end state.
    pub async fn pending_restores(&self) -> Vec<RestoreMarker> {
        let mut markers = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.data_dir).await else {
            return markers;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(MARKER_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            let parsed = tokio::fs::read(entry.path())
                .await
                .map(|raw| serde_json::from_slice::<RestoreMarker>(&raw));
            match parsed {
                Ok(Ok(marker)) => markers.push(marker),
                Ok(Err(e)) => tracing::warn!(marker = %name, error = %e, "Unreadable restore marker"),
                Err(e) => tracing::warn!(marker = %name, error = %e, "Failed to read restore marker"),
            }
        }
        markers
    }

    pub async fn restore_pending(&self, instance: &str) -> bool {
        tokio::fs::try_exists(self.marker_path(instance)).await.unwrap_or(false)
    }

    /// Delete an instance's data directory and forget its lock.
    pub async fn purge_data(&self, instance: &str) -> Result<(), BackupError> {
        let lock = self.instance_lock(instance);
        let _guard = lock.lock().await;
        let removed = match tokio::fs::remove_dir_all(self.live_dir(instance)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        self.locks.remove(instance);
        removed
    }
}

async fn roll_back(live: &Path, holding: Option<&Path>) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(live).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(holding) = holding {
        tokio::fs::rename(holding, live).await?;
    }
    Ok(())
}

fn zip_entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Zip every file, directory and symlink under `src` into `dest`.
fn archive_directory(src: &Path, dest: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(dest)?;
    let mut zip = zip::ZipWriter::new(file);
    let base = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let name = zip_entry_name(rel);

        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            base.unix_permissions(entry.metadata()?.permissions().mode() & 0o7777)
        };
        #[cfg(not(unix))]
        let options = base;

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            zip.add_symlink(name, target.to_string_lossy(), options)?;
        } else if file_type.is_dir() {
            zip.add_directory(name, options)?;
        } else if file_type.is_file() {
            zip.start_file(name, options)?;
            let mut f = std::fs::File::open(entry.path())?;
            std::io::copy(&mut f, &mut zip)?;
        } else {
            tracing::debug!(path = %entry.path().display(), "Skipping special file");
        }
    }

    let file = zip.finish()?;
    file.sync_all()?;
    Ok(())
}

/// True when a link at `link_rel` pointing to `target` resolves inside the
/// extraction root. Only leading `..` components are accepted.
fn link_target_inside(link_rel: &Path, target: &Path) -> bool {
    let mut depth = link_rel.components().count() as isize - 1;
    let mut descended = false;
    for component in target.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir if !descended => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::Normal(_) => {
                descended = true;
                depth += 1;
            }
            _ => return false,
        }
    }
    true
}

/// Extract `archive` into `out_dir`, refusing entries that would escape it.
/// Symlinks are created last so no file is ever written through one.
fn extract_archive(archive: &Path, out_dir: &Path) -> anyhow::Result<()> {
    let f = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(f)?;
    let mut links = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let rel = entry
            .enclosed_name()
            .ok_or_else(|| anyhow::anyhow!("unsafe path in archive: {:?}", entry.name()))?;
        let out_path = out_dir.join(&rel);

        if entry.is_symlink() {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            links.push((rel, PathBuf::from(target)));
            continue;
        }

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    for (rel, target) in links {
        if !link_target_inside(&rel, &target) {
            tracing::warn!(
                link = %rel.display(),
                target = %target.display(),
                "Skipping symlink that leaves the data directory"
            );
            continue;
        }
        let out_path = out_dir.join(&rel);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &out_path)?;
        #[cfg(not(unix))]
        tracing::debug!(link = %rel.display(), "Symlinks are not restored on this platform");
    }
    Ok(())
}
