use thiserror::Error;

/// Named failure kinds surfaced by the backup core.
///
/// Most errors in this crate travel as `anyhow::Error` with operation
/// context attached. The cases below carry meaning the caller has to act
/// on (skip vs abort, exit code, user messaging), so they are typed and
/// can be recovered with `err.downcast_ref::<ErrorKind>()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ErrorKind {
    /// A project directory, named backup version, or archive entry is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// An archive's checksum no longer matches the manifest record.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// A recovery target already exists and no disposition was chosen.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A hostile or malformed archive entry was rejected during extraction.
    #[error("security violation: {0}")]
    Security(String),
}

/// True if `err` is (or wraps) the given kind of failure.
pub fn is_kind(err: &anyhow::Error, check: impl Fn(&ErrorKind) -> bool) -> bool {
    err.downcast_ref::<ErrorKind>().map_or(false, check)
}
