//! Versioned archive codec.
//!
//! Backups are plain zip archives with every entry rooted at
//! `<project>/<relative path>`, so extracting one into a source root
//! recreates the project directory. Extraction is defensive: symlink
//! entries, path-traversal names and falsified size headers are all
//! rejected before anything is written outside the destination.

use anyhow::{anyhow, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ErrorKind;

/// Cap on a single entry's declared uncompressed size.
const MAX_ENTRY_SIZE: u64 = 10 * 1024 * 1024 * 1024; // 10 GiB

/// Size and CRC-32 of one archived file, as recorded in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub size: u64,
    pub crc32: u32,
}

/// Creates, extracts and inspects versioned backup archives.
pub trait ArchiveCodec: Send + Sync {
    /// Archive `source_dir` into `destination`, skipping excluded names.
    /// Returns the number of files stored.
    fn create(&self, destination: &Path, source_dir: &Path, exclude: &[String])
        -> Result<usize>;

    /// Extract every entry of `archive` under `dest_dir`.
    fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()>;

    /// List entries as relative path (project prefix stripped) -> info.
    fn list(&self, archive: &Path) -> Result<BTreeMap<String, EntryInfo>>;

    /// Read one archived file's content. `rel_path` is relative to the
    /// project root; `project` supplies the stripped prefix.
    fn read_file(&self, archive: &Path, rel_path: &str, project: &str) -> Result<Vec<u8>>;
}

/// Exclusion filter over base names: exact match or glob match.
struct ExcludeMatcher {
    exact: HashSet<String>,
    globs: GlobSet,
}

impl ExcludeMatcher {
    fn new(patterns: &[String]) -> Result<Self> {
        let mut exact = HashSet::new();
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            exact.insert(pattern.clone());
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    // Still honored as an exact name.
                    log::debug!("Exclude pattern '{pattern}' is not a valid glob: {e}");
                }
            }
        }

        let globs = builder
            .build()
            .context("Failed to build exclusion glob set")?;
        Ok(Self { exact, globs })
    }

    fn matches(&self, base_name: &str) -> bool {
        self.exact.contains(base_name) || self.globs.is_match(base_name)
    }
}

/// Production codec backed by the zip container with Deflate compression.
pub struct ZipCodec;

impl ZipCodec {
    fn project_prefix(source_dir: &Path) -> Result<String> {
        source_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                anyhow!(
                    "Cannot derive a project name from '{}'",
                    source_dir.display()
                )
            })
    }

    fn entry_name(prefix: &str, rel: &Path) -> String {
        let mut name = String::from(prefix);
        for component in rel.components() {
            name.push('/');
            name.push_str(&component.as_os_str().to_string_lossy());
        }
        name
    }
}

/// Reject an entry whose declared uncompressed size is over the cap.
fn check_declared_size(name: &str, declared: u64) -> Result<()> {
    if declared > MAX_ENTRY_SIZE {
        return Err(ErrorKind::Security(format!(
            "entry {name} declares {declared} bytes, over the {MAX_ENTRY_SIZE} byte limit"
        ))
        .into());
    }
    Ok(())
}

/// Copy at most `declared + 1` bytes from a decompressing reader, failing
/// if the stream holds more data than the entry's header claims.
fn copy_bounded<R: Read, W: Write>(reader: R, writer: &mut W, declared: u64) -> Result<u64> {
    let mut limited = reader.take(declared.saturating_add(1));
    let written = std::io::copy(&mut limited, writer)?;
    if written > declared {
        return Err(ErrorKind::Security(format!(
            "entry contains more than its declared {declared} bytes"
        ))
        .into());
    }
    Ok(written)
}

impl ArchiveCodec for ZipCodec {
    fn create(
        &self,
        destination: &Path,
        source_dir: &Path,
        exclude: &[String],
    ) -> Result<usize> {
        let matcher = ExcludeMatcher::new(exclude)?;
        let prefix = Self::project_prefix(source_dir)?;

        let file = File::create(destination)
            .with_context(|| format!("Failed to create archive {}", destination.display()))?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut count = 0usize;
        let walker = walkdir::WalkDir::new(source_dir)
            .into_iter()
            // Pruning an excluded directory here skips its whole subtree.
            .filter_entry(|e| {
                e.depth() == 0 || !matcher.matches(&e.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Skipping unreadable path during archive creation: {e}");
                    continue;
                }
            };
            // Directories are implicit; symlinks are never archived.
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(source_dir)
                .context("Walked path escaped the source directory")?;

            // Best effort: a file that cannot be read is omitted, the
            // backup still covers everything else.
            let data = match std::fs::read(entry.path()) {
                Ok(data) => data,
                Err(e) => {
                    log::warn!("Skipping {}: {e}", entry.path().display());
                    continue;
                }
            };

            zip.start_file(Self::entry_name(&prefix, rel), options)
                .with_context(|| format!("Failed to add entry for {}", rel.display()))?;
            zip.write_all(&data)
                .with_context(|| format!("Failed to write entry for {}", rel.display()))?;
            count += 1;
        }

        zip.finish()
            .with_context(|| format!("Failed to finalize archive {}", destination.display()))?;
        Ok(count)
    }

    fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dest_dir).with_context(|| {
            format!("Failed to create destination {}", dest_dir.display())
        })?;
        let dest = dest_dir.canonicalize().with_context(|| {
            format!("Failed to resolve destination {}", dest_dir.display())
        })?;

        let file = File::open(archive)
            .with_context(|| format!("Failed to open archive {}", archive.display()))?;
        let mut zip = ZipArchive::new(file)
            .with_context(|| format!("Failed to read archive {}", archive.display()))?;

        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .with_context(|| format!("Failed to read entry #{index}"))?;

            if entry.is_dir() {
                continue;
            }

            if let Some(mode) = entry.unix_mode() {
                if mode & 0o170000 == 0o120000 {
                    return Err(ErrorKind::Security(format!(
                        "archive contains a symlink entry: {}",
                        entry.name()
                    ))
                    .into());
                }
            }

            let rel = entry.enclosed_name().ok_or_else(|| {
                ErrorKind::Security(format!(
                    "entry path escapes the destination: {}",
                    entry.name()
                ))
            })?;
            let out_path = dest.join(&rel);
            if !out_path.starts_with(&dest) {
                return Err(ErrorKind::Security(format!(
                    "entry path escapes the destination: {}",
                    entry.name()
                ))
                .into());
            }

            let declared = entry.size();
            check_declared_size(entry.name(), declared)?;

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory {}", parent.display())
                })?;
            }

            let mut out_file = File::create(&out_path)
                .with_context(|| format!("Failed to create {}", out_path.display()))?;
            if let Err(e) = copy_bounded(&mut entry, &mut out_file, declared) {
                drop(out_file);
                let _ = std::fs::remove_file(&out_path);
                return Err(e.context(format!("Failed to extract {}", out_path.display())));
            }
        }

        Ok(())
    }

    fn list(&self, archive: &Path) -> Result<BTreeMap<String, EntryInfo>> {
        let file = File::open(archive)
            .with_context(|| format!("Failed to open archive {}", archive.display()))?;
        let mut zip = ZipArchive::new(file)
            .with_context(|| format!("Failed to read archive {}", archive.display()))?;

        let mut entries = BTreeMap::new();
        for index in 0..zip.len() {
            let entry = zip
                .by_index(index)
                .with_context(|| format!("Failed to read entry #{index}"))?;
            if entry.is_dir() {
                continue;
            }

            // Entries are rooted at the project name; listings use the
            // project-relative path.
            let name = entry.name();
            let rel = match name.split_once('/') {
                Some((_, rel)) if !rel.is_empty() => rel.to_string(),
                _ => continue,
            };

            entries.insert(
                rel,
                EntryInfo {
                    size: entry.size(),
                    crc32: entry.crc32(),
                },
            );
        }

        Ok(entries)
    }

    fn read_file(&self, archive: &Path, rel_path: &str, project: &str) -> Result<Vec<u8>> {
        let file = File::open(archive)
            .with_context(|| format!("Failed to open archive {}", archive.display()))?;
        let mut zip = ZipArchive::new(file)
            .with_context(|| format!("Failed to read archive {}", archive.display()))?;

        let full_name = format!("{project}/{rel_path}");
        let mut entry = match zip.by_name(&full_name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ErrorKind::NotFound(format!(
                    "no entry '{rel_path}' in {}",
                    archive.display()
                ))
                .into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read entry '{full_name}'"))
            }
        };

        let declared = entry.size();
        check_declared_size(&full_name, declared)?;

        let mut content = Vec::with_capacity(declared.min(1 << 20) as usize);
        copy_bounded(&mut entry, &mut content, declared)
            .with_context(|| format!("Failed to read entry '{full_name}'"))?;
        Ok(content)
    }
}

/// Resolve the archive path for a version of a project.
///
/// Versions are named by their archive file; the trailing `.zip` may be
/// omitted by callers.
pub fn archive_path(backup_dir: &Path, project: &str, version: &str) -> PathBuf {
    let file = if version.ends_with(".zip") {
        version.to_string()
    } else {
        format!("{version}.zip")
    };
    backup_dir.join(project).join(file)
}
