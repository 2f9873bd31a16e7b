//! Backups of managed configuration files taken before an action mutates them.
//!
//! Layout: `<root>/<action_id>-<timestamp>/manifest.json` plus one `NNN.bak`
//! copy per file that existed. Files that did not exist are recorded so a
//! restore can remove anything the action created.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared::crypto::sha256_bytes_hex;

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackupError {
    #[error("backup I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("invalid backup manifest: {0}")]
    Manifest(String),
}

fn io_error(path: &Path, e: std::io::Error) -> BackupError {
    BackupError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub existed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_as: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub action_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

/// A captured backup on disk.
#[derive(Debug, Clone)]
pub struct Backup {
    pub dir: PathBuf,
    pub manifest: BackupManifest,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy every file in `paths` into a fresh backup directory.
    pub async fn capture(&self, action_id: Uuid, paths: &[PathBuf]) -> Result<Backup, BackupError> {
        let created_at = Utc::now();
        let dir = self.root.join(format!(
            "{}-{}",
            action_id,
            created_at.format("%Y%m%dT%H%M%S%.3fZ")
        ));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let mut files = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let stored_as = format!("{:03}.bak", index);
                    let target = dir.join(&stored_as);
                    tokio::fs::write(&target, &bytes)
                        .await
                        .map_err(|e| io_error(&target, e))?;
                    files.push(ManifestEntry {
                        path: path.clone(),
                        existed: true,
                        sha256: Some(sha256_bytes_hex(&bytes)),
                        stored_as: Some(stored_as),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    files.push(ManifestEntry {
                        path: path.clone(),
                        existed: false,
                        sha256: None,
                        stored_as: None,
                    });
                }
                Err(e) => return Err(io_error(path, e)),
            }
        }

        let manifest = BackupManifest {
            action_id,
            created_at,
            files,
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        let encoded = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| BackupError::Manifest(e.to_string()))?;
        tokio::fs::write(&manifest_path, encoded)
            .await
            .map_err(|e| io_error(&manifest_path, e))?;

        tracing::debug!(
            action_id = %action_id,
            dir = %dir.display(),
            files = manifest.files.len(),
            "Backup captured"
        );
        Ok(Backup { dir, manifest })
    }

    /// Put every file back exactly as captured and remove files the action
    /// created. Returns the number of files touched.
    pub async fn restore(&self, backup: &Backup) -> Result<usize, BackupError> {
        let mut touched = 0;
        for entry in &backup.manifest.files {
            match (&entry.stored_as, &entry.sha256) {
                (Some(stored_as), Some(expected)) if entry.existed => {
                    let source = backup.dir.join(stored_as);
                    let bytes = tokio::fs::read(&source)
                        .await
                        .map_err(|e| io_error(&source, e))?;
                    if &sha256_bytes_hex(&bytes) != expected {
                        return Err(BackupError::ChecksumMismatch(source.display().to_string()));
                    }
                    if let Some(parent) = entry.path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| io_error(parent, e))?;
                    }
                    tokio::fs::write(&entry.path, &bytes)
                        .await
                        .map_err(|e| io_error(&entry.path, e))?;

                    let written = tokio::fs::read(&entry.path)
                        .await
                        .map_err(|e| io_error(&entry.path, e))?;
                    if &sha256_bytes_hex(&written) != expected {
                        return Err(BackupError::ChecksumMismatch(
                            entry.path.display().to_string(),
                        ));
                    }
                    touched += 1;
                }
                _ if !entry.existed => match tokio::fs::remove_file(&entry.path).await {
                    Ok(()) => touched += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_error(&entry.path, e)),
                },
                _ => {
                    return Err(BackupError::Manifest(format!(
                        "entry for {} has no stored copy",
                        entry.path.display()
                    )))
                }
            }
        }

        tracing::info!(
            action_id = %backup.manifest.action_id,
            files = touched,
            "Backup restored"
        );
        Ok(touched)
    }

    /// Delete a backup that is no longer needed.
    pub async fn discard(&self, backup: &Backup) -> Result<(), BackupError> {
        match tokio::fs::remove_dir_all(&backup.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&backup.dir, e)),
        }
    }

    async fn created_at(dir: &Path) -> Option<DateTime<Utc>> {
        if let Ok(bytes) = tokio::fs::read(dir.join(MANIFEST_FILE)).await {
            if let Ok(manifest) = serde_json::from_slice::<BackupManifest>(&bytes) {
                return Some(manifest.created_at);
            }
        }
        let modified = tokio::fs::metadata(dir).await.ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// Remove backup directories created before `cutoff`.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, BackupError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match Self::created_at(&path).await {
                Some(created) if created < cutoff => {
                    tokio::fs::remove_dir_all(&path)
                        .await
                        .map_err(|e| io_error(&path, e))?;
                    removed += 1;
                }
                _ => {}
            }
        }
        Ok(removed)
    }
}
