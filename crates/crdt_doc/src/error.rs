//! Error types for the replicated document core.

use thiserror::Error;

/// Result type alias for document operations.
pub type DocResult<T> = Result<T, DocError>;

/// Validation errors for actors, counters and clocks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// Actor ids must be non-empty strings.
    #[error("actor id must be a non-empty string")]
    InvalidActor,

    /// Counters are positive; a dot with ctr 0 cannot exist.
    #[error("counter must be a positive integer")]
    InvalidCtr,
}

impl ClockError {
    /// Stable reason code for error envelopes and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ClockError::InvalidActor => "INVALID_ACTOR",
            ClockError::InvalidCtr => "INVALID_CTR",
        }
    }
}

/// Structural errors raised while traversing or building documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocError {
    /// Traversal crossed the shared depth bound.
    #[error("max traversal depth exceeded at {path}")]
    DepthExceeded {
        /// JSON pointer of the frame where the bound was hit.
        path: String,
    },

    /// A sequence insert referenced a predecessor that is not present.
    #[error("predecessor element {prev} not found in sequence")]
    MissingPredecessor {
        /// The rendered id of the missing predecessor.
        prev: String,
    },
}

impl DocError {
    /// Stable reason code for error envelopes and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            DocError::DepthExceeded { .. } => "MAX_DEPTH_EXCEEDED",
            DocError::MissingPredecessor { .. } => "MISSING_PARENT",
        }
    }
}

/// Errors raised while merging two documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// Two sequences disagree on the lineage of a shared element, or share
    /// no origin at all.
    #[error("lineage mismatch at {path}: {detail}")]
    LineageMismatch {
        /// JSON pointer of the sequence that disagrees.
        path: String,
        /// Which field (or set relation) conflicts.
        detail: String,
    },

    /// Merge traversal crossed the shared depth bound.
    #[error("max traversal depth exceeded at {path}")]
    DepthExceeded {
        /// JSON pointer of the frame where the bound was hit.
        path: String,
    },
}

impl MergeError {
    /// Stable reason code for error envelopes and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            MergeError::LineageMismatch { .. } => "LINEAGE_MISMATCH",
            MergeError::DepthExceeded { .. } => "MAX_DEPTH_EXCEEDED",
        }
    }

    /// JSON pointer context carried by the error.
    pub fn path(&self) -> &str {
        match self {
            MergeError::LineageMismatch { path, .. } => path,
            MergeError::DepthExceeded { path } => path,
        }
    }
}

/// Why a serialized document was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireReason {
    /// A field was missing or had the wrong type.
    InvalidShape,
    /// The shape parsed but a structural invariant does not hold.
    InvalidInvariant,
    /// Sequence predecessor references form a cycle.
    CyclicPredecessors,
    /// The serialized tree is deeper than the shared depth bound.
    DepthExceeded,
}

impl WireReason {
    /// Stable reason code for error envelopes and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            WireReason::InvalidShape => "INVALID_SERIALIZED_SHAPE",
            WireReason::InvalidInvariant => "INVALID_SERIALIZED_INVARIANT",
            WireReason::CyclicPredecessors => "CYCLIC_PREDECESSORS",
            WireReason::DepthExceeded => "MAX_DEPTH_EXCEEDED",
        }
    }
}

/// A serialized document failed strict validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid serialized document at {path}: {message} ({})", .reason.reason())]
pub struct WireError {
    /// The closed rejection reason.
    pub reason: WireReason,
    /// JSON pointer of the offending node.
    pub path: String,
    /// Human-readable detail.
    pub message: String,
}

impl WireError {
    pub(crate) fn new(reason: WireReason, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason,
            path: path.into(),
            message: message.into(),
        }
    }
}
