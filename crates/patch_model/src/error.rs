//! Error types for the patch model crate.

use thiserror::Error;

/// A string failed to parse as a strict RFC 6901 JSON pointer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid JSON pointer {pointer:?}: {detail}")]
pub struct PointerError {
    /// The offending pointer text.
    pub pointer: String,
    /// What was wrong with it.
    pub detail: String,
}

impl PointerError {
    pub(crate) fn new(pointer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            detail: detail.into(),
        }
    }
}

/// Closed set of reasons a patch operation can fail against a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyErrorKind {
    /// The pointer is syntactically invalid for where it is used (bad
    /// escape, bad array index token, `-` outside an `add`).
    InvalidPointer,
    /// The target slot cannot take this operation (wrong container kind,
    /// removing the document root, moving a container into itself).
    InvalidTarget,
    /// An intermediate container on the path does not exist.
    MissingParent,
    /// The addressed entry does not exist.
    MissingTarget,
    /// An array index is past the end of the array.
    OutOfBounds,
    /// A `test` operation did not match.
    TestFailed,
    /// The operation is structurally unsupported.
    UnsupportedOp,
}

impl ApplyErrorKind {
    /// Stable reason code for error envelopes and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ApplyErrorKind::InvalidPointer => "INVALID_POINTER",
            ApplyErrorKind::InvalidTarget => "INVALID_TARGET",
            ApplyErrorKind::MissingParent => "MISSING_PARENT",
            ApplyErrorKind::MissingTarget => "MISSING_TARGET",
            ApplyErrorKind::OutOfBounds => "OUT_OF_BOUNDS",
            ApplyErrorKind::TestFailed => "TEST_FAILED",
            ApplyErrorKind::UnsupportedOp => "UNSUPPORTED_OP",
        }
    }
}

/// A patch operation failed against a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("op {op_index} failed with {} at {path:?}", .kind.reason())]
pub struct ApplyError {
    /// Why the operation failed.
    pub kind: ApplyErrorKind,
    /// Pointer of the offending location.
    pub path: String,
    /// Index of the failing operation within the patch.
    pub op_index: usize,
}

impl ApplyError {
    pub(crate) fn new(kind: ApplyErrorKind, path: impl Into<String>, op_index: usize) -> Self {
        Self {
            kind,
            path: path.into(),
            op_index,
        }
    }
}
