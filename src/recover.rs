//! Point-in-time recovery.
//!
//! Recovery always verifies the archive checksum against the manifest
//! before touching the target. An existing project directory must be
//! dispositioned explicitly: wiped, or renamed aside as
//! `<project>-archived-<timestamp>`; without a choice, recovery refuses
//! to act.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::Path;

use crate::archive::ArchiveCodec;
use crate::error::ErrorKind;
use crate::fs::Filesystem;
use crate::manifest::{compute_sha256, BackupEntry, Manifest};

/// What to do when the recovery target already exists. Choosing both is a
/// caller-side validation error; if both arrive anyway, wipe wins.
#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    /// Version to recover; the latest backup when `None`.
    pub version: Option<String>,
    /// Delete an existing target directory before extraction.
    pub wipe: bool,
    /// Rename an existing target directory aside before extraction.
    pub archive: bool,
}

pub struct RecoveryEngine<'a> {
    fs: &'a dyn Filesystem,
    codec: &'a dyn ArchiveCodec,
}

impl<'a> RecoveryEngine<'a> {
    pub fn new(fs: &'a dyn Filesystem, codec: &'a dyn ArchiveCodec) -> Self {
        Self { fs, codec }
    }

    fn find_entry<'m>(
        manifest: &'m Manifest,
        project: &str,
        version: Option<&str>,
    ) -> Result<&'m BackupEntry> {
        match version {
            None => manifest.latest_backup().ok_or_else(|| {
                ErrorKind::NotFound(format!("no backups recorded for '{project}'")).into()
            }),
            Some(version) => manifest
                .backups
                .iter()
                .find(|e| e.file == version || e.file.trim_end_matches(".zip") == version)
                .ok_or_else(|| {
                    ErrorKind::NotFound(format!(
                        "no backup version '{version}' for '{project}'"
                    ))
                    .into()
                }),
        }
    }

    /// Check a recorded backup's archive against its manifest checksum.
    pub fn verify(
        &self,
        project: &str,
        backup_dir: &Path,
        version: Option<&str>,
    ) -> Result<()> {
        let manifest = Manifest::load(self.fs, backup_dir, project)?;
        let entry = Self::find_entry(&manifest, project, version)?;

        let archive = backup_dir.join(project).join(&entry.file);
        let actual = compute_sha256(&archive)?;
        if actual != entry.sha256 {
            return Err(ErrorKind::Integrity(format!(
                "archive {} has checksum {actual}, manifest records {}",
                entry.file, entry.sha256
            ))
            .into());
        }

        log::info!("Verified {} for {project}", entry.file);
        Ok(())
    }

    /// Restore a project into `source_dir` from a recorded backup.
    pub fn recover(
        &self,
        project: &str,
        source_dir: &Path,
        backup_dir: &Path,
        options: &RecoverOptions,
    ) -> Result<()> {
        let manifest = Manifest::load(self.fs, backup_dir, project)?;
        let entry = Self::find_entry(&manifest, project, options.version.as_deref())?;
        let file = entry.file.clone();

        self.verify(project, backup_dir, options.version.as_deref())
            .context("verification failed")?;

        let target = source_dir.join(project);
        if self.fs.exists(&target) {
            if options.wipe {
                log::info!("Wiping existing {}", target.display());
                self.fs.remove_dir_all(&target)?;
            } else if options.archive {
                let aside = source_dir.join(format!(
                    "{project}-archived-{}",
                    Local::now().format("%Y%m%d-%H%M%S")
                ));
                log::info!(
                    "Archiving existing {} -> {}",
                    target.display(),
                    aside.display()
                );
                self.fs.rename(&target, &aside)?;
            } else {
                return Err(ErrorKind::Conflict(format!(
                    "target {} already exists; pass wipe or archive",
                    target.display()
                ))
                .into());
            }
        }

        // Entries are rooted at the project name, so extracting into the
        // source root recreates the project directory.
        let archive = backup_dir.join(project).join(&file);
        self.codec
            .extract(&archive, source_dir)
            .with_context(|| format!("Failed to extract {file}"))?;

        log::info!("Recovered {project} from {file}");
        Ok(())
    }

    /// All recorded versions for a project, oldest first. Display ordering
    /// is the caller's concern.
    pub fn list_versions(&self, project: &str, backup_dir: &Path) -> Result<Vec<BackupEntry>> {
        let manifest = Manifest::load(self.fs, backup_dir, project)?;
        Ok(manifest.backups)
    }
}
