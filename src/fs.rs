//! Filesystem capability port.
//!
//! The manifest store and the change detector go through this trait instead
//! of calling `std::fs` directly, so they can run against the in-memory
//! [`MemFilesystem`] in tests. The zip codec is the exception: the archive
//! container needs a real seekable file and always works on disk.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Minimal stat result: everything the core needs to know about a file.
#[derive(Debug, Clone, Copy)]
pub struct FileMeta {
    pub len: u64,
    pub modified: SystemTime,
}

/// Blocking filesystem operations used by the backup core.
///
/// Walks never follow symbolic links.
pub trait Filesystem: Send + Sync {
    /// Read a file's full contents.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write a file, creating parent directories as needed.
    fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Whether a file or directory exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Whether `path` is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Immediate children of a directory, sorted by name.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Stat a file.
    fn metadata(&self, path: &Path) -> Result<FileMeta>;

    /// Remove a single file.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory and everything under it.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Rename a file or directory.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Visit every regular file under `root` (recursively). The visitor
    /// returns `false` to stop the walk early.
    fn walk_files(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(&Path, &FileMeta) -> bool,
    ) -> Result<()>;
}

/// Production implementation backed by `std::fs` and `walkdir`.
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)
            .with_context(|| format!("Failed to list directory {}", path.display()))?;

        let mut children: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        children.sort();
        Ok(children)
    }

    fn metadata(&self, path: &Path) -> Result<FileMeta> {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        Ok(FileMeta {
            len: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove file {}", path.display()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory {}", path.display()))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to).with_context(|| {
            format!("Failed to rename {} -> {}", from.display(), to.display())
        })
    }

    fn walk_files(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(&Path, &FileMeta) -> bool,
    ) -> Result<()> {
        for entry in walkdir::WalkDir::new(root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::debug!("Skipping unreadable entry under {}: {e}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => FileMeta {
                    len: m.len(),
                    modified: m.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                },
                Err(_) => continue,
            };
            if !visit(entry.path(), &meta) {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemFile {
    data: Vec<u8>,
    modified: SystemTime,
}

/// In-memory filesystem double for tests.
///
/// Directories are implicit: a directory exists whenever some file path
/// lives under it, mirroring how the backup core actually probes the tree.
#[derive(Default)]
pub struct MemFilesystem {
    files: Mutex<BTreeMap<PathBuf, MemFile>>,
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file with an explicit modification time.
    pub fn write_with_mtime(&self, path: &Path, data: &[u8], modified: SystemTime) {
        self.files.lock().unwrap().insert(
            path.to_path_buf(),
            MemFile {
                data: data.to_vec(),
                modified,
            },
        );
    }

    fn is_under(path: &Path, dir: &Path) -> bool {
        path.starts_with(dir) && path != dir
    }
}

impl Filesystem for MemFilesystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| anyhow!("Failed to read {}: no such file", path.display()))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.write_with_mtime(path, data, SystemTime::now());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        files.contains_key(path) || files.keys().any(|p| Self::is_under(p, path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        let files = self.files.lock().unwrap();
        !files.contains_key(path) && files.keys().any(|p| Self::is_under(p, path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        let mut children: Vec<PathBuf> = files
            .keys()
            .filter(|p| Self::is_under(p, path))
            .filter_map(|p| {
                let rel = p.strip_prefix(path).ok()?;
                let first = rel.components().next()?;
                Some(path.join(first.as_os_str()))
            })
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }

    fn metadata(&self, path: &Path) -> Result<FileMeta> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|f| FileMeta {
                len: f.data.len() as u64,
                modified: f.modified,
            })
            .ok_or_else(|| anyhow!("Failed to stat {}: no such file", path.display()))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("Failed to remove {}: no such file", path.display()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        files.retain(|p, _| !Self::is_under(p, path) && p != path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap();

        if let Some(file) = files.remove(from) {
            files.insert(to.to_path_buf(), file);
            return Ok(());
        }

        let moved: Vec<(PathBuf, MemFile)> = files
            .iter()
            .filter(|(p, _)| Self::is_under(p, from))
            .map(|(p, f)| {
                let rel = p.strip_prefix(from).expect("checked by is_under");
                (to.join(rel), f.clone())
            })
            .collect();

        if moved.is_empty() {
            return Err(anyhow!("Failed to rename {}: no such path", from.display()));
        }

        files.retain(|p, _| !Self::is_under(p, from));
        files.extend(moved);
        Ok(())
    }

    fn walk_files(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(&Path, &FileMeta) -> bool,
    ) -> Result<()> {
        let snapshot: Vec<(PathBuf, FileMeta)> = {
            let files = self.files.lock().unwrap();
            files
                .iter()
                .filter(|(p, _)| p.starts_with(root))
                .map(|(p, f)| {
                    (
                        p.clone(),
                        FileMeta {
                            len: f.data.len() as u64,
                            modified: f.modified,
                        },
                    )
                })
                .collect()
        };

        for (path, meta) in snapshot {
            if !visit(&path, &meta) {
                break;
            }
        }
        Ok(())
    }
}
