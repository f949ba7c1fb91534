//! Version comparison.
//!
//! File-level diffs come straight from the archive listings (size and
//! CRC-32, no decompression). Line-level diffs use a greedy two-cursor
//! scan: it is not a minimum-edit-distance diff, and rescans of the
//! remaining right-hand lines can cost O(n²) on large files, but it is
//! stable and predictable. The algorithm is private to this module so a
//! classical diff could replace it behind the same surface.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::archive::ArchiveCodec;

/// How a file differs between two versions. Declaration order doubles as
/// display priority: modifications first, then additions, then deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Modified,
    Added,
    Deleted,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeStatus::Modified => "modified",
            ChangeStatus::Added => "added",
            ChangeStatus::Deleted => "deleted",
        }
    }
}

/// One file's difference between version A and version B.
#[derive(Debug, Clone, Serialize)]
pub struct FileChange {
    pub path: String,
    pub status: ChangeStatus,
    /// Size in version A; `None` for added files.
    pub size_a: Option<u64>,
    /// Size in version B; `None` for deleted files.
    pub size_b: Option<u64>,
}

/// Comparison of two archived versions. Derived on demand, never persisted.
#[derive(Debug, Serialize)]
pub struct DiffResult {
    pub version_a: String,
    pub version_b: String,
    pub changes: Vec<FileChange>,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

/// Kind of one line in a line-level diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Unchanged,
    Added,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffLine {
    pub kind: LineKind,
    pub text: String,
}

/// Line-level diff of one file across two versions.
#[derive(Debug, Serialize)]
pub struct FileDiff {
    pub path: String,
    /// When either side is binary, `lines` is empty.
    pub is_binary: bool,
    pub lines: Vec<DiffLine>,
}

pub struct DiffEngine<'a> {
    codec: &'a dyn ArchiveCodec,
}

impl<'a> DiffEngine<'a> {
    pub fn new(codec: &'a dyn ArchiveCodec) -> Self {
        Self { codec }
    }

    /// File-level comparison of two versions of a project.
    pub fn compute_diff(
        &self,
        project: &str,
        backup_dir: &Path,
        version_a: &str,
        version_b: &str,
    ) -> Result<DiffResult> {
        let listing_a = self
            .codec
            .list(&crate::archive::archive_path(backup_dir, project, version_a))?;
        let listing_b = self
            .codec
            .list(&crate::archive::archive_path(backup_dir, project, version_b))?;

        let mut changes = Vec::new();

        for (path, info_a) in &listing_a {
            match listing_b.get(path) {
                None => changes.push(FileChange {
                    path: path.clone(),
                    status: ChangeStatus::Deleted,
                    size_a: Some(info_a.size),
                    size_b: None,
                }),
                Some(info_b) if info_a.size != info_b.size || info_a.crc32 != info_b.crc32 => {
                    changes.push(FileChange {
                        path: path.clone(),
                        status: ChangeStatus::Modified,
                        size_a: Some(info_a.size),
                        size_b: Some(info_b.size),
                    })
                }
                Some(_) => {} // unchanged, omitted
            }
        }

        for (path, info_b) in &listing_b {
            if !listing_a.contains_key(path) {
                changes.push(FileChange {
                    path: path.clone(),
                    status: ChangeStatus::Added,
                    size_a: None,
                    size_b: Some(info_b.size),
                });
            }
        }

        changes.sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.path.cmp(&b.path)));

        let added = changes.iter().filter(|c| c.status == ChangeStatus::Added).count();
        let modified = changes
            .iter()
            .filter(|c| c.status == ChangeStatus::Modified)
            .count();
        let deleted = changes
            .iter()
            .filter(|c| c.status == ChangeStatus::Deleted)
            .count();

        Ok(DiffResult {
            version_a: version_a.to_string(),
            version_b: version_b.to_string(),
            changes,
            added,
            modified,
            deleted,
        })
    }

    /// Line-level diff of one file across two versions. Reads only the
    /// side(s) the status requires.
    pub fn compute_file_diff(
        &self,
        project: &str,
        backup_dir: &Path,
        version_a: &str,
        version_b: &str,
        rel_path: &str,
        status: ChangeStatus,
    ) -> Result<FileDiff> {
        let path_a = crate::archive::archive_path(backup_dir, project, version_a);
        let path_b = crate::archive::archive_path(backup_dir, project, version_b);

        let content_a = match status {
            ChangeStatus::Added => None,
            _ => Some(self.codec.read_file(&path_a, rel_path, project)?),
        };
        let content_b = match status {
            ChangeStatus::Deleted => None,
            _ => Some(self.codec.read_file(&path_b, rel_path, project)?),
        };

        if content_a.as_deref().map_or(false, is_binary)
            || content_b.as_deref().map_or(false, is_binary)
        {
            return Ok(FileDiff {
                path: rel_path.to_string(),
                is_binary: true,
                lines: Vec::new(),
            });
        }

        let text_a = content_a
            .map(|c| String::from_utf8_lossy(&c).into_owned())
            .unwrap_or_default();
        let text_b = content_b
            .map(|c| String::from_utf8_lossy(&c).into_owned())
            .unwrap_or_default();

        let lines = match status {
            ChangeStatus::Added => text_b
                .split('\n')
                .map(|line| DiffLine {
                    kind: LineKind::Added,
                    text: line.to_string(),
                })
                .collect(),
            ChangeStatus::Deleted => text_a
                .split('\n')
                .map(|line| DiffLine {
                    kind: LineKind::Deleted,
                    text: line.to_string(),
                })
                .collect(),
            ChangeStatus::Modified => line_diff(&text_a, &text_b),
        };

        Ok(FileDiff {
            path: rel_path.to_string(),
            is_binary: false,
            lines,
        })
    }
}

/// Binary sniffing over the first 8000 bytes: any NUL byte, or bytes that
/// are not valid UTF-8. A multibyte character split at the sniff boundary
/// does not count as invalid.
pub fn is_binary(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(8000)];
    if sample.contains(&0) {
        return true;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => false,
        // error_len() == None means the sample ends mid-character.
        Err(e) => e.error_len().is_some(),
    }
}

/// Greedy two-cursor line alignment.
///
/// Equal heads advance both sides; a left-hand line that never reoccurs in
/// the remaining right-hand lines is a deletion; anything else is an
/// addition of the right-hand head.
fn line_diff(a: &str, b: &str) -> Vec<DiffLine> {
    let a_lines: Vec<&str> = a.split('\n').collect();
    let b_lines: Vec<&str> = b.split('\n').collect();

    let mut out = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);

    while i < a_lines.len() || j < b_lines.len() {
        if i < a_lines.len() && j < b_lines.len() && a_lines[i] == b_lines[j] {
            out.push(DiffLine {
                kind: LineKind::Unchanged,
                text: a_lines[i].to_string(),
            });
            i += 1;
            j += 1;
        } else if i < a_lines.len()
            && (j >= b_lines.len() || !b_lines[j..].contains(&a_lines[i]))
        {
            out.push(DiffLine {
                kind: LineKind::Deleted,
                text: a_lines[i].to_string(),
            });
            i += 1;
        } else {
            out.push(DiffLine {
                kind: LineKind::Added,
                text: b_lines[j].to_string(),
            });
            j += 1;
        }
    }

    out
}
