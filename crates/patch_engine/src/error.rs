//! Typed errors for patch compilation and application.
//!
//! Patch failures carry a closed reason set, the JSON pointer of the
//! offending location and the index of the failing operation. The same
//! envelope applies whether the failure came from the compiler, the applier, or the
//! preflight validator. Internal lookup errors never escape; they are
//! mapped through one fixed table.

use crdt_doc::{ClockError, DocError, MergeError, WireError};
use patch_model::{ApplyError, ApplyErrorKind};
use thiserror::Error;

/// Closed set of patch failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchErrorKind {
    /// A `test` operation did not match.
    TestFailed,
    /// A pointer is syntactically invalid where it is used.
    InvalidPointer,
    /// The target slot cannot take this operation.
    InvalidTarget,
    /// An intermediate container on the path does not exist.
    MissingParent,
    /// The addressed entry does not exist.
    MissingTarget,
    /// An array index is past the end.
    OutOfBounds,
    /// Dot minting could not escape counter skew within its attempt budget.
    DotGenerationExhausted,
    /// A traversal crossed the shared depth bound.
    MaxDepthExceeded,
    /// The operation is structurally unsupported.
    UnsupportedOp,
    /// A number in a patched value is not finite (strict validation).
    NonFiniteNumber,
    /// A value slot carried no JSON value at all (strict validation).
    UndefinedValue,
}

impl PatchErrorKind {
    /// Stable reason code for error envelopes and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            PatchErrorKind::TestFailed => "TEST_FAILED",
            PatchErrorKind::InvalidPointer => "INVALID_POINTER",
            PatchErrorKind::InvalidTarget => "INVALID_TARGET",
            PatchErrorKind::MissingParent => "MISSING_PARENT",
            PatchErrorKind::MissingTarget => "MISSING_TARGET",
            PatchErrorKind::OutOfBounds => "OUT_OF_BOUNDS",
            PatchErrorKind::DotGenerationExhausted => "DOT_GENERATION_EXHAUSTED",
            PatchErrorKind::MaxDepthExceeded => "MAX_DEPTH_EXCEEDED",
            PatchErrorKind::UnsupportedOp => "UNSUPPORTED_OP",
            PatchErrorKind::NonFiniteNumber => "NON_FINITE_NUMBER",
            PatchErrorKind::UndefinedValue => "UNDEFINED_VALUE",
        }
    }
}

/// A patch could not be compiled or applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} at {path:?} (op {op_index:?}): {message}", .kind.reason())]
pub struct PatchError {
    /// The closed failure reason.
    pub kind: PatchErrorKind,
    /// JSON pointer of the offending location, when known.
    pub path: Option<String>,
    /// Index of the failing operation within the patch, when known.
    pub op_index: Option<usize>,
    /// Human-readable detail.
    pub message: String,
}

impl PatchError {
    /// Conflict code reported alongside every patch failure.
    pub const CODE: u16 = 409;

    /// Build an error with full context.
    pub fn new(
        kind: PatchErrorKind,
        path: impl Into<String>,
        op_index: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: Some(path.into()),
            op_index: Some(op_index),
            message: message.into(),
        }
    }

    /// Build an error with no location context.
    pub fn bare(kind: PatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            op_index: None,
            message: message.into(),
        }
    }
}

impl From<ApplyError> for PatchError {
    fn from(err: ApplyError) -> Self {
        // Fixed mapping from the reference applier's reasons.
        let kind = match err.kind {
            ApplyErrorKind::InvalidPointer => PatchErrorKind::InvalidPointer,
            ApplyErrorKind::InvalidTarget => PatchErrorKind::InvalidTarget,
            ApplyErrorKind::MissingParent => PatchErrorKind::MissingParent,
            ApplyErrorKind::MissingTarget => PatchErrorKind::MissingTarget,
            ApplyErrorKind::OutOfBounds => PatchErrorKind::OutOfBounds,
            ApplyErrorKind::TestFailed => PatchErrorKind::TestFailed,
            ApplyErrorKind::UnsupportedOp => PatchErrorKind::UnsupportedOp,
        };
        PatchError::new(kind, err.path, err.op_index, "patch validation failed")
    }
}

impl From<DocError> for PatchError {
    fn from(err: DocError) -> Self {
        match err {
            DocError::DepthExceeded { path } => PatchError {
                kind: PatchErrorKind::MaxDepthExceeded,
                path: Some(path),
                op_index: None,
                message: "max traversal depth exceeded".to_string(),
            },
            DocError::MissingPredecessor { prev } => PatchError {
                kind: PatchErrorKind::MissingParent,
                path: None,
                op_index: None,
                message: format!("predecessor {prev} not present in head sequence"),
            },
        }
    }
}

/// Umbrella error for façade operations that can fail in more than one
/// family (state creation, forking).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Patch compilation or application failed.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Actor or counter validation failed.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// Document traversal or construction failed.
    #[error(transparent)]
    Doc(#[from] DocError),

    /// Merging two documents failed.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// A serialized state was rejected.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A fork tried to reuse the origin's actor without opting in.
    #[error("fork would reuse actor {actor:?}; pass allow_actor_reuse to permit this")]
    ActorReuse {
        /// The reused actor id.
        actor: String,
    },
}
