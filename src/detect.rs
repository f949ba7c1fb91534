//! Change detection: decides whether a project needs a new backup.
//!
//! Cheap checks come first. With no previous backup the answer is always
//! yes. For repositories, the recorded revision id against the current one
//! settles it without touching the tree. Only when that is inconclusive
//! does the detector fall back to walking the tree comparing modification
//! times, stopping at the first file newer than the last backup.

use anyhow::Result;
use std::path::Path;
use std::time::SystemTime;

use crate::fs::Filesystem;
use crate::manifest::BackupEntry;
use crate::vcs::{short_rev, Vcs};

pub struct ChangeDetector<'a> {
    fs: &'a dyn Filesystem,
    vcs: &'a dyn Vcs,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(fs: &'a dyn Filesystem, vcs: &'a dyn Vcs) -> Self {
        Self { fs, vcs }
    }

    /// Whether `project_path` has changed since `last_backup`, with a
    /// human-readable reason either way.
    pub fn has_changes(
        &self,
        project_path: &Path,
        last_backup: Option<&BackupEntry>,
    ) -> Result<(bool, String)> {
        let last = match last_backup {
            Some(last) => last,
            None => return Ok((true, "no previous backup".to_string())),
        };

        if self.vcs.is_repository(project_path) {
            let current = self.vcs.current_revision(project_path)?;
            let recorded = last.git_head.as_deref().unwrap_or("");

            if let Some(current) = current.as_deref() {
                if !current.is_empty() && !recorded.is_empty() {
                    if current != recorded {
                        return Ok((
                            true,
                            format!("{} -> {}", short_rev(recorded), short_rev(current)),
                        ));
                    }
                    return Ok((false, "git HEAD unchanged".to_string()));
                }
            }
            // Inconclusive (no revision on either side): fall through to
            // the mtime walk.
        }

        let cutoff: SystemTime = last.created_at.into();
        let mut changed = false;
        self.fs.walk_files(project_path, &mut |path, meta| {
            if meta.modified > cutoff {
                log::debug!("Modified since last backup: {}", path.display());
                changed = true;
                return false;
            }
            true
        })?;

        if changed {
            Ok((true, "files modified since last backup".to_string()))
        } else {
            Ok((false, "no changes detected".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFilesystem;
    use crate::vcs::FakeVcs;
    use chrono::{Duration, Utc};

    fn entry_at(created_at: chrono::DateTime<Utc>, git_head: Option<&str>) -> BackupEntry {
        BackupEntry {
            file: "20250101-120000.zip".to_string(),
            sha256: "0".repeat(64),
            size_bytes: 1,
            created_at,
            git_head: git_head.map(|s| s.to_string()),
            file_count: 1,
            excluded: Vec::new(),
        }
    }

    #[test]
    fn test_no_previous_backup() {
        let fs = MemFilesystem::new();
        let vcs = FakeVcs::new();
        let detector = ChangeDetector::new(&fs, &vcs);

        let (changed, reason) = detector
            .has_changes(Path::new("/projects/api"), None)
            .unwrap();
        assert!(changed);
        assert_eq!(reason, "no previous backup");
    }

    #[test]
    fn test_git_head_unchanged() {
        let fs = MemFilesystem::new();
        let vcs = FakeVcs::new();
        let project = Path::new("/projects/api");
        vcs.set_revision(project, "0123456789abcdef");

        let detector = ChangeDetector::new(&fs, &vcs);
        let last = entry_at(Utc::now(), Some("0123456789abcdef"));

        let (changed, reason) = detector.has_changes(project, Some(&last)).unwrap();
        assert!(!changed);
        assert_eq!(reason, "git HEAD unchanged");
    }

    #[test]
    fn test_git_head_moved_reports_short_ids() {
        let fs = MemFilesystem::new();
        let vcs = FakeVcs::new();
        let project = Path::new("/projects/api");
        vcs.set_revision(project, "fedcba9876543210");

        let detector = ChangeDetector::new(&fs, &vcs);
        let last = entry_at(Utc::now(), Some("0123456789abcdef"));

        let (changed, reason) = detector.has_changes(project, Some(&last)).unwrap();
        assert!(changed);
        assert_eq!(reason, "0123456 -> fedcba9");
    }

    #[test]
    fn test_missing_recorded_revision_falls_back_to_mtime() {
        let fs = MemFilesystem::new();
        let vcs = FakeVcs::new();
        let project = Path::new("/projects/api");
        vcs.set_revision(project, "fedcba9876543210");

        let last_time = Utc::now() - Duration::hours(1);
        fs.write_with_mtime(
            &project.join("main.rs"),
            b"fn main() {}",
            (last_time + Duration::minutes(30)).into(),
        );

        let detector = ChangeDetector::new(&fs, &vcs);
        // Repository, but the previous entry recorded no revision.
        let last = entry_at(last_time, None);

        let (changed, reason) = detector.has_changes(project, Some(&last)).unwrap();
        assert!(changed);
        assert_eq!(reason, "files modified since last backup");
    }

    #[test]
    fn test_mtime_walk_no_changes() {
        let fs = MemFilesystem::new();
        let vcs = FakeVcs::new();
        let project = Path::new("/projects/api");

        let last_time = Utc::now();
        fs.write_with_mtime(
            &project.join("main.rs"),
            b"fn main() {}",
            (last_time - Duration::hours(2)).into(),
        );

        let detector = ChangeDetector::new(&fs, &vcs);
        let last = entry_at(last_time, None);

        let (changed, reason) = detector.has_changes(project, Some(&last)).unwrap();
        assert!(!changed);
        assert_eq!(reason, "no changes detected");
    }

    #[test]
    fn test_mtime_walk_detects_newer_file() {
        let fs = MemFilesystem::new();
        let vcs = FakeVcs::new();
        let project = Path::new("/projects/api");

        let last_time = Utc::now() - Duration::hours(1);
        fs.write_with_mtime(
            &project.join("old.rs"),
            b"old",
            (last_time - Duration::hours(1)).into(),
        );
        fs.write_with_mtime(
            &project.join("sub/new.rs"),
            b"new",
            (last_time + Duration::minutes(5)).into(),
        );

        let detector = ChangeDetector::new(&fs, &vcs);
        let last = entry_at(last_time, None);

        let (changed, reason) = detector.has_changes(project, Some(&last)).unwrap();
        assert!(changed);
        assert_eq!(reason, "files modified since last backup");
    }
}
