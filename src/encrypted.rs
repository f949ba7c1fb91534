//! Encrypted-snapshot capability port.
//!
//! Sensitive paths (dotfiles, credential stores) are handled by an external
//! encrypted backup tool. This module only defines the interface consumers
//! program against: the core never implements or invokes it, the process
//! wrapper lives outside this crate, and tests substitute an in-memory
//! double.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One snapshot in the encrypted repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Tool-assigned snapshot id.
    pub id: String,
    /// When the snapshot was taken.
    pub time: DateTime<Utc>,
    /// Tags attached at backup time.
    pub tags: Vec<String>,
    /// Absolute paths captured in the snapshot.
    pub paths: Vec<PathBuf>,
}

/// Operations offered by the external encrypted backup tool.
pub trait EncryptedBackup: Send + Sync {
    /// Initialize the encrypted repository.
    fn init_repository(&self) -> Result<()>;

    /// Whether the repository has been initialized.
    fn is_initialized(&self) -> Result<bool>;

    /// Back up the given paths under a tag, returning the new snapshot id.
    fn backup_paths(&self, tag: &str, paths: &[&Path]) -> Result<String>;

    /// List snapshots, optionally restricted to one tag.
    fn list_snapshots(&self, tag: Option<&str>) -> Result<Vec<SnapshotInfo>>;

    /// Restore a snapshot into `target`.
    fn restore(&self, snapshot_id: &str, target: &Path) -> Result<()>;

    /// Apply a keep-last retention policy, dropping older snapshots.
    fn forget_keep_last(&self, keep_last: usize) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemEncrypted {
        snapshots: Mutex<Vec<SnapshotInfo>>,
    }

    impl EncryptedBackup for MemEncrypted {
        fn init_repository(&self) -> Result<()> {
            Ok(())
        }

        fn is_initialized(&self) -> Result<bool> {
            Ok(true)
        }

        fn backup_paths(&self, tag: &str, paths: &[&Path]) -> Result<String> {
            let mut snapshots = self.snapshots.lock().unwrap();
            let id = format!("snap-{}", snapshots.len() + 1);
            snapshots.push(SnapshotInfo {
                id: id.clone(),
                time: Utc::now(),
                tags: vec![tag.to_string()],
                paths: paths.iter().map(|p| p.to_path_buf()).collect(),
            });
            Ok(id)
        }

        fn list_snapshots(&self, tag: Option<&str>) -> Result<Vec<SnapshotInfo>> {
            let snapshots = self.snapshots.lock().unwrap();
            Ok(snapshots
                .iter()
                .filter(|s| tag.map_or(true, |t| s.tags.iter().any(|x| x == t)))
                .cloned()
                .collect())
        }

        fn restore(&self, snapshot_id: &str, _target: &Path) -> Result<()> {
            let snapshots = self.snapshots.lock().unwrap();
            if snapshots.iter().any(|s| s.id == snapshot_id) {
                Ok(())
            } else {
                Err(anyhow!("no such snapshot: {snapshot_id}"))
            }
        }

        fn forget_keep_last(&self, keep_last: usize) -> Result<()> {
            let mut snapshots = self.snapshots.lock().unwrap();
            let excess = snapshots.len().saturating_sub(keep_last);
            snapshots.drain(..excess);
            Ok(())
        }
    }

    #[test]
    fn test_backup_list_and_retention() {
        let store = MemEncrypted::default();

        store.backup_paths("dotfiles", &[Path::new("/home/u/.ssh")]).unwrap();
        store.backup_paths("dotfiles", &[Path::new("/home/u/.ssh")]).unwrap();
        store.backup_paths("other", &[Path::new("/home/u/.gnupg")]).unwrap();

        assert_eq!(store.list_snapshots(None).unwrap().len(), 3);
        assert_eq!(store.list_snapshots(Some("dotfiles")).unwrap().len(), 2);

        store.forget_keep_last(1).unwrap();
        let remaining = store.list_snapshots(None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "snap-3");
    }

    #[test]
    fn test_restore_unknown_snapshot_fails() {
        let store = MemEncrypted::default();
        assert!(store.restore("snap-404", Path::new("/tmp/out")).is_err());
    }
}
