//! # projvault
//!
//! An incremental backup tool for local source-code project directories.
//!
//! ## Overview
//!
//! `projvault` takes versioned, checksum-verified zip archives of each
//! project under a source root. Unchanged projects are skipped (by git
//! revision when available, by modification times otherwise), every archive
//! is recorded in a per-project JSON manifest, and retention pruning keeps
//! only the most recent versions. Any recorded version can be verified,
//! recovered into place with explicit conflict handling, or compared
//! against another version file-by-file and line-by-line.
//!
//! ## Key Features
//!
//! - **Change detection**: git HEAD comparison with an mtime-walk fallback
//! - **Hardened extraction**: symlink entries, path-traversal names and
//!   falsified size headers are rejected before anything is written
//! - **Integrity**: every archive's SHA-256 is recorded at creation and
//!   re-checked before recovery
//! - **Retention**: keep-last-N pruning of old versions per project
//! - **Version diffing**: file-level (size/CRC) and line-level comparison
//!
//! ## Architecture
//!
//! Engines take their collaborators (filesystem, version control, archive
//! codec) as explicit constructor parameters; there is no ambient global
//! state, and each collaborator has an in-memory double for tests.

/// Named failure kinds (not-found, integrity, conflict, security) carried
/// inside `anyhow::Error` and recovered by downcast.
pub mod error;

/// Platform config directory and log file locations.
pub mod config;

/// Console and file logging setup.
pub mod logger;

/// Filesystem capability port with an on-disk and an in-memory backend.
pub mod fs;

/// Version-control capability port; git CLI backend and a test double.
pub mod vcs;

/// Interface to the external encrypted snapshot tool for sensitive paths.
/// Consumed by the CLI layer, never implemented in the core.
pub mod encrypted;

/// The zip archive codec: creation with exclusions, hardened extraction,
/// listing and single-entry reads.
pub mod archive;

/// Per-project manifest: backup history, retention pruning, checksums.
pub mod manifest;

/// Decides whether a project needs a new backup.
pub mod detect;

/// Backup orchestration for one project or a whole source root.
pub mod backup;

/// Checksum verification and point-in-time recovery with conflict handling.
pub mod recover;

/// File-level and line-level comparison of two archived versions.
pub mod diff;
