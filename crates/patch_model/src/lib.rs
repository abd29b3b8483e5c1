//! # patch_model
//!
//! The RFC side of the engine: strict RFC 6901 JSON pointers, RFC 6902
//! patch operations with the verbatim wire format, a literal reference
//! applier, and a deterministic diff engine.
//!
//! This crate knows nothing about CRDTs; it is the shared vocabulary the
//! replication engine compiles from and is tested against.
//!
//! # Example
//!
//! ```
//! use patch_model::{apply_patch_copy, diff, DiffOptions};
//! use serde_json::json;
//!
//! let base = json!({"arr": [1, 2, 3]});
//! let next = json!({"arr": [1, 3, 4]});
//!
//! let patch = diff(&base, &next, &DiffOptions::default());
//! assert_eq!(apply_patch_copy(&base, &patch).unwrap(), next);
//! ```

pub mod apply;
pub mod diff;
pub mod error;
pub mod op;
pub mod pointer;

// Re-exports for convenience
pub use apply::{apply_patch, apply_patch_copy};
pub use diff::{diff, ArrayStrategy, DiffOptions};
pub use error::{ApplyError, ApplyErrorKind, PointerError};
pub use op::{Patch, PatchOp};
pub use pointer::{escape, ArrayToken, Pointer};
