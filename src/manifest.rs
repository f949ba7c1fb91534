//! Per-project backup manifest.
//!
//! Each project keeps a `manifest.json` next to its archives listing every
//! recorded version in chronological order. The list is append-only, except
//! that pruning may drop a contiguous prefix of oldest entries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::fs::Filesystem;

/// One recorded backup version. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Archive file name, e.g. `20250101-120000.zip`.
    pub file: String,

    /// SHA-256 hex digest of the archive bytes as written.
    pub sha256: String,

    /// Archive size in bytes.
    pub size_bytes: u64,

    /// When the backup was taken.
    pub created_at: DateTime<Utc>,

    /// Revision id of the project's repository at backup time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,

    /// Number of files stored in the archive.
    pub file_count: usize,

    /// Exclusion patterns in effect when the backup was taken.
    #[serde(default)]
    pub excluded: Vec<String>,
}

/// A project's backup history, oldest entry first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Project name (directory name under the source root).
    pub project: String,

    /// Source path the backups were taken from.
    pub source: String,

    /// Recorded versions in chronological order.
    pub backups: Vec<BackupEntry>,
}

impl Manifest {
    /// Path of a project's manifest file.
    pub fn path(backup_dir: &Path, project: &str) -> PathBuf {
        backup_dir.join(project).join("manifest.json")
    }

    /// Fresh manifest with no recorded backups.
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            source: String::new(),
            backups: Vec::new(),
        }
    }

    /// Load a project's manifest. A missing manifest file is an empty
    /// history, not an error; a malformed one is.
    pub fn load(fs: &dyn Filesystem, backup_dir: &Path, project: &str) -> Result<Self> {
        let path = Self::path(backup_dir, project);
        if !fs.exists(&path) {
            return Ok(Self::new(project));
        }

        let data = fs
            .read(&path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    /// Write the manifest as pretty-printed JSON, creating directories as
    /// needed. Load-mutate-save is not atomic; single invocation per
    /// project is assumed.
    pub fn save(&self, fs: &dyn Filesystem, backup_dir: &Path) -> Result<()> {
        let path = Self::path(backup_dir, &self.project);
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize manifest")?;
        fs.write(&path, &json)
            .with_context(|| format!("Failed to write manifest {}", path.display()))
    }

    /// Append a new backup record.
    pub fn add_backup(&mut self, entry: BackupEntry) {
        self.backups.push(entry);
    }

    /// The most recent backup, if any.
    pub fn latest_backup(&self) -> Option<&BackupEntry> {
        self.backups.last()
    }

    /// Drop the oldest entries so that at most `keep_last` remain, deleting
    /// their archive files. A `keep_last` of zero disables pruning.
    ///
    /// File deletion is best effort: an archive that cannot be removed is
    /// still dropped from the manifest. Returns the file names that were
    /// actually deleted.
    pub fn prune(
        &mut self,
        fs: &dyn Filesystem,
        backup_dir: &Path,
        keep_last: usize,
    ) -> Vec<String> {
        if keep_last == 0 || self.backups.len() <= keep_last {
            return Vec::new();
        }

        let excess = self.backups.len() - keep_last;
        let mut deleted = Vec::new();

        for entry in self.backups.drain(..excess) {
            let path = backup_dir.join(&self.project).join(&entry.file);
            match fs.remove_file(&path) {
                Ok(()) => {
                    log::info!("Pruned backup {}", entry.file);
                    deleted.push(entry.file);
                }
                Err(e) => {
                    log::warn!("Could not delete pruned backup {}: {e}", entry.file);
                }
            }
        }

        deleted
    }
}

/// Hex SHA-256 of a file, streamed rather than read into memory.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFilesystem;
    use tempfile::TempDir;

    fn entry(file: &str) -> BackupEntry {
        BackupEntry {
            file: file.to_string(),
            sha256: "0".repeat(64),
            size_bytes: 128,
            created_at: Utc::now(),
            git_head: None,
            file_count: 3,
            excluded: vec!["target".to_string()],
        }
    }

    #[test]
    fn test_load_absent_manifest_is_empty() {
        let fs = MemFilesystem::new();
        let manifest = Manifest::load(&fs, Path::new("/backups"), "api").unwrap();

        assert_eq!(manifest.project, "api");
        assert!(manifest.backups.is_empty());
        assert!(manifest.latest_backup().is_none());
    }

    #[test]
    fn test_load_malformed_manifest_fails() {
        let fs = MemFilesystem::new();
        let path = Manifest::path(Path::new("/backups"), "api");
        fs.write(&path, b"{ not json").unwrap();

        assert!(Manifest::load(&fs, Path::new("/backups"), "api").is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let fs = MemFilesystem::new();
        let backup_dir = Path::new("/backups");

        let mut manifest = Manifest::new("api");
        manifest.source = "/projects/api".to_string();
        manifest.add_backup(entry("20250101-120000.zip"));
        manifest.add_backup(entry("20250102-120000.zip"));
        manifest.save(&fs, backup_dir).unwrap();

        let loaded = Manifest::load(&fs, backup_dir, "api").unwrap();
        assert_eq!(loaded.source, "/projects/api");
        assert_eq!(loaded.backups.len(), 2);
        assert_eq!(
            loaded.latest_backup().unwrap().file,
            "20250102-120000.zip"
        );
        assert_eq!(loaded.backups[0].excluded, vec!["target"]);
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let fs = MemFilesystem::new();
        let backup_dir = Path::new("/backups");

        let mut manifest = Manifest::new("api");
        for day in 1..=5 {
            let file = format!("2025010{day}-120000.zip");
            fs.write(&backup_dir.join("api").join(&file), b"zipdata")
                .unwrap();
            manifest.add_backup(entry(&file));
        }

        let deleted = manifest.prune(&fs, backup_dir, 2);

        assert_eq!(
            deleted,
            vec!["20250101-120000.zip", "20250102-120000.zip", "20250103-120000.zip"]
        );
        assert_eq!(manifest.backups.len(), 2);
        assert_eq!(manifest.backups[0].file, "20250104-120000.zip");
        assert!(!fs.exists(&backup_dir.join("api").join("20250101-120000.zip")));
        assert!(fs.exists(&backup_dir.join("api").join("20250105-120000.zip")));
    }

    #[test]
    fn test_prune_disabled_or_within_budget() {
        let fs = MemFilesystem::new();
        let backup_dir = Path::new("/backups");

        let mut manifest = Manifest::new("api");
        manifest.add_backup(entry("20250101-120000.zip"));
        manifest.add_backup(entry("20250102-120000.zip"));

        assert!(manifest.prune(&fs, backup_dir, 0).is_empty());
        assert_eq!(manifest.backups.len(), 2);

        assert!(manifest.prune(&fs, backup_dir, 2).is_empty());
        assert_eq!(manifest.backups.len(), 2);
    }

    #[test]
    fn test_prune_tolerates_missing_archive_file() {
        let fs = MemFilesystem::new();
        let backup_dir = Path::new("/backups");

        // Two entries but only the newer file exists on disk.
        let mut manifest = Manifest::new("api");
        manifest.add_backup(entry("20250101-120000.zip"));
        manifest.add_backup(entry("20250102-120000.zip"));
        fs.write(&backup_dir.join("api").join("20250102-120000.zip"), b"z")
            .unwrap();

        let deleted = manifest.prune(&fs, backup_dir, 1);

        // Entry dropped from the manifest even though no file was deleted.
        assert!(deleted.is_empty());
        assert_eq!(manifest.backups.len(), 1);
        assert_eq!(manifest.backups[0].file, "20250102-120000.zip");
    }

    #[test]
    fn test_compute_sha256_known_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("abc.txt");
        std::fs::write(&path, "abc").unwrap();

        assert_eq!(
            compute_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
