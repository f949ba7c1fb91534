//! Backup orchestration.
//!
//! One backup run per project: detect changes, write a timestamped archive,
//! checksum it, record a manifest entry, prune old versions. The batch
//! variant walks every project under a source root and isolates failures so
//! one broken project does not stop the rest.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::path::Path;

use crate::archive::ArchiveCodec;
use crate::detect::ChangeDetector;
use crate::error::ErrorKind;
use crate::fs::Filesystem;
use crate::manifest::{compute_sha256, BackupEntry, Manifest};
use crate::vcs::Vcs;

/// How many versions to keep per project. Zero keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Retention {
    pub keep_last: usize,
}

/// Result of backing up one project.
#[derive(Debug)]
pub struct BackupOutcome {
    pub project: String,
    /// True when change detection found nothing to do.
    pub skipped: bool,
    /// Why the backup ran or was skipped.
    pub reason: String,
    /// The new manifest entry; `None` when skipped.
    pub entry: Option<BackupEntry>,
    /// Archive file names removed by retention pruning.
    pub pruned: Vec<String>,
}

/// Per-project result of a batch run; failures are carried, not raised.
#[derive(Debug)]
pub struct ProjectResult {
    pub project: String,
    pub outcome: Result<BackupOutcome>,
}

pub struct BackupEngine<'a> {
    fs: &'a dyn Filesystem,
    vcs: &'a dyn Vcs,
    codec: &'a dyn ArchiveCodec,
}

impl<'a> BackupEngine<'a> {
    pub fn new(
        fs: &'a dyn Filesystem,
        vcs: &'a dyn Vcs,
        codec: &'a dyn ArchiveCodec,
    ) -> Self {
        Self { fs, vcs, codec }
    }

    /// Back up one project from `source_dir/<project>` into
    /// `backup_dir/<project>/`.
    ///
    /// A failure after the archive is written but before the manifest is
    /// saved leaves an orphan archive file with no manifest entry; orphans
    /// are harmless and not cleaned up automatically.
    pub fn backup_project(
        &self,
        project: &str,
        source_dir: &Path,
        backup_dir: &Path,
        exclude: &[String],
        retention: Retention,
    ) -> Result<BackupOutcome> {
        let project_path = source_dir.join(project);
        if !self.fs.is_dir(&project_path) {
            return Err(ErrorKind::NotFound(format!(
                "project directory {}",
                project_path.display()
            ))
            .into());
        }

        let mut manifest = Manifest::load(self.fs, backup_dir, project)?;
        manifest.source = project_path.display().to_string();

        let detector = ChangeDetector::new(self.fs, self.vcs);
        let (changed, reason) =
            detector.has_changes(&project_path, manifest.latest_backup())?;
        if !changed {
            log::info!("Skipping {project}: {reason}");
            return Ok(BackupOutcome {
                project: project.to_string(),
                skipped: true,
                reason,
                entry: None,
                pruned: Vec::new(),
            });
        }

        let project_backup_dir = backup_dir.join(project);
        std::fs::create_dir_all(&project_backup_dir).with_context(|| {
            format!(
                "Failed to create backup directory {}",
                project_backup_dir.display()
            )
        })?;

        // Second-resolution timestamps: two backups of the same project
        // within one second collide and the later write wins.
        let file_name = format!("{}.zip", Local::now().format("%Y%m%d-%H%M%S"));
        let archive = project_backup_dir.join(&file_name);

        log::info!("Backing up {project} ({reason})");
        let file_count = self
            .codec
            .create(&archive, &project_path, exclude)
            .with_context(|| format!("Failed to archive {}", project_path.display()))?;

        let size_bytes = self.fs.metadata(&archive)?.len;
        let sha256 = compute_sha256(&archive)?;
        let git_head = self.vcs.current_revision(&project_path)?;

        let entry = BackupEntry {
            file: file_name,
            sha256,
            size_bytes,
            created_at: Utc::now(),
            git_head,
            file_count,
            excluded: exclude.to_vec(),
        };
        manifest.add_backup(entry.clone());

        let pruned = if retention.keep_last > 0 {
            manifest.prune(self.fs, backup_dir, retention.keep_last)
        } else {
            Vec::new()
        };

        manifest.save(self.fs, backup_dir)?;
        log::info!(
            "Recorded {} for {project} ({} files, {} bytes)",
            entry.file,
            entry.file_count,
            entry.size_bytes
        );

        Ok(BackupOutcome {
            project: project.to_string(),
            skipped: false,
            reason,
            entry: Some(entry),
            pruned,
        })
    }

    /// Back up every project under `source_dir`, sequentially.
    ///
    /// A project is any immediate subdirectory whose name does not start
    /// with a dot. One project's failure is recorded in its result and the
    /// batch continues.
    pub fn run_backup(
        &self,
        source_dir: &Path,
        backup_dir: &Path,
        exclude: &[String],
        retention: Retention,
    ) -> Result<Vec<ProjectResult>> {
        let children = self
            .fs
            .read_dir(source_dir)
            .with_context(|| format!("Failed to list source root {}", source_dir.display()))?;

        let mut results = Vec::new();
        for child in children {
            if !self.fs.is_dir(&child) {
                continue;
            }
            let name = match child.file_name() {
                Some(name) => name.to_string_lossy().to_string(),
                None => continue,
            };
            if name.starts_with('.') {
                continue;
            }

            let outcome =
                self.backup_project(&name, source_dir, backup_dir, exclude, retention);
            if let Err(e) = &outcome {
                log::error!("Backup of {name} failed: {e:#}");
            }
            results.push(ProjectResult {
                project: name,
                outcome,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ZipCodec;
    use crate::error::is_kind;
    use crate::fs::OsFilesystem;
    use crate::vcs::FakeVcs;
    use tempfile::TempDir;

    fn make_tree(root: &Path, files: &[(&str, &str)]) {
        for (rel, content) in files {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn test_backup_missing_project_is_not_found() {
        let temp = TempDir::new().unwrap();
        let fs = OsFilesystem;
        let vcs = FakeVcs::new();
        let codec = ZipCodec;
        let engine = BackupEngine::new(&fs, &vcs, &codec);

        let err = engine
            .backup_project(
                "ghost",
                temp.path(),
                &temp.path().join("backups"),
                &[],
                Retention::default(),
            )
            .unwrap_err();
        assert!(is_kind(&err, |k| matches!(k, ErrorKind::NotFound(_))));
    }

    #[test]
    fn test_first_backup_then_skip() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("projects");
        let backups = temp.path().join("backups");
        make_tree(&source.join("api"), &[("src/main.rs", "fn main() {}")]);

        let fs = OsFilesystem;
        let vcs = FakeVcs::new();
        vcs.set_revision(&source.join("api"), "0123456789abcdef");
        let codec = ZipCodec;
        let engine = BackupEngine::new(&fs, &vcs, &codec);

        let outcome = engine
            .backup_project("api", &source, &backups, &[], Retention::default())
            .unwrap();
        assert!(!outcome.skipped);
        assert_eq!(outcome.reason, "no previous backup");
        let entry = outcome.entry.unwrap();
        assert_eq!(entry.file_count, 1);
        assert_eq!(entry.git_head.as_deref(), Some("0123456789abcdef"));
        assert!(backups.join("api").join(&entry.file).exists());

        // Unchanged repository: second run skips without writing.
        let outcome = engine
            .backup_project("api", &source, &backups, &[], Retention::default())
            .unwrap();
        assert!(outcome.skipped);
        assert_eq!(outcome.reason, "git HEAD unchanged");

        let manifest = Manifest::load(&fs, &backups, "api").unwrap();
        assert_eq!(manifest.backups.len(), 1);
    }

    #[test]
    fn test_run_backup_skips_hidden_and_isolates_failures() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("projects");
        let backups = temp.path().join("backups");
        make_tree(&source.join("api"), &[("a.txt", "a")]);
        make_tree(&source.join("web"), &[("b.txt", "b")]);
        make_tree(&source.join(".hidden"), &[("c.txt", "c")]);
        std::fs::write(source.join("stray.txt"), "not a project").unwrap();

        let fs = OsFilesystem;
        let vcs = FakeVcs::new();
        let codec = ZipCodec;
        let engine = BackupEngine::new(&fs, &vcs, &codec);

        let results = engine
            .run_backup(&source, &backups, &[], Retention::default())
            .unwrap();

        let names: Vec<&str> = results.iter().map(|r| r.project.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert!(results.iter().all(|r| r.outcome.is_ok()));
    }

    #[test]
    fn test_retention_prunes_after_backup() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("projects");
        let backups = temp.path().join("backups");
        make_tree(&source.join("api"), &[("a.txt", "v1")]);

        let fs = OsFilesystem;
        let vcs = FakeVcs::new();
        let codec = ZipCodec;
        let engine = BackupEngine::new(&fs, &vcs, &codec);
        let retention = Retention { keep_last: 2 };

        // Three backups, each forced by touching the tree with a future
        // mtime so the change detector fires, with distinct archive names.
        for round in 0..3u64 {
            std::fs::write(source.join("api").join("a.txt"), format!("v{round}")).unwrap();
            let future = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
            let file = std::fs::File::options()
                .write(true)
                .open(source.join("api").join("a.txt"))
                .unwrap();
            file.set_modified(future).unwrap();
            drop(file);

            let outcome = engine
                .backup_project("api", &source, &backups, &[], retention)
                .unwrap();
            assert!(!outcome.skipped);
            if round < 2 {
                assert!(outcome.pruned.is_empty());
                // Distinct second-resolution archive names per round.
                std::thread::sleep(std::time::Duration::from_millis(1100));
            } else {
                assert_eq!(outcome.pruned.len(), 1);
            }
        }

        let manifest = Manifest::load(&fs, &backups, "api").unwrap();
        assert_eq!(manifest.backups.len(), 2);
        for entry in &manifest.backups {
            assert!(backups.join("api").join(&entry.file).exists());
        }
    }
}
