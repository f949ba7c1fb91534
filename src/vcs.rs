//! Version-control capability port.
//!
//! The backup core only needs two facts from a VCS: whether a project
//! directory is a repository, and what its current revision id is. The
//! production backend shells out to the `git` CLI; tests use [`FakeVcs`].

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

/// Read-only view of a project's version-control state.
pub trait Vcs: Send + Sync {
    /// Whether `path` is the root of a repository.
    fn is_repository(&self, path: &Path) -> bool;

    /// Current revision id of the repository at `path`, or `None` if the
    /// directory is not a repository or has no commits yet.
    fn current_revision(&self, path: &Path) -> Result<Option<String>>;
}

/// Shorten a revision id to the conventional 7-character form.
pub fn short_rev(rev: &str) -> &str {
    if rev.len() > 7 {
        &rev[..7]
    } else {
        rev
    }
}

/// Git backend using the git CLI.
pub struct GitCli;

impl Vcs for GitCli {
    fn is_repository(&self, path: &Path) -> bool {
        path.join(".git").exists()
    }

    fn current_revision(&self, path: &Path) -> Result<Option<String>> {
        // A missing git binary or an empty repository both degrade to "no
        // revision"; the change detector falls back to mtime comparison.
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(path)
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let rev = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if rev.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(rev))
                }
            }
            _ => Ok(None),
        }
    }
}

/// In-memory VCS double for tests.
#[derive(Default)]
pub struct FakeVcs {
    revisions: Mutex<HashMap<PathBuf, String>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as a repository at the given revision.
    pub fn set_revision(&self, path: &Path, rev: &str) {
        self.revisions
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), rev.to_string());
    }
}

impl Vcs for FakeVcs {
    fn is_repository(&self, path: &Path) -> bool {
        self.revisions.lock().unwrap().contains_key(path)
    }

    fn current_revision(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.revisions.lock().unwrap().get(path).cloned())
    }
}
