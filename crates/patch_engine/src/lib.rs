//! # patch_engine
//!
//! Converts RFC 6902 JSON Patches into operations on a JSON-shaped CRDT
//! and back, so that peers can independently apply patches, exchange whole
//! states and converge without coordination.
//!
//! The pipeline: a patch plus a base snapshot is [compiled](compile) into a
//! closed set of typed [intents](intent), which the [applier](apply)
//! executes against the replicated head, minting a dot per write. The
//! [`State`] façade packages a document with its actor's clock and exposes
//! create/fork/apply/merge/compact/diff/serialize.
//!
//! # Example
//!
//! ```
//! use patch_engine::{ApplyOptions, ForkOptions, State, StateMergeOptions, StateOptions};
//! use serde_json::json;
//!
//! let origin = State::new(&json!({"list": ["a"]}), "origin", &StateOptions::default()).unwrap();
//! let a = origin.fork("peer-a", &ForkOptions::default()).unwrap();
//! let b = origin.fork("peer-b", &ForkOptions::default()).unwrap();
//!
//! let patch: patch_engine::Patch =
//!     serde_json::from_str(r#"[{"op":"add","path":"/list/-","value":"b"}]"#).unwrap();
//! let a = a.apply_patch(&patch, &ApplyOptions::default()).unwrap();
//!
//! let merged = b.merge(&a, &StateMergeOptions::new()).unwrap();
//! assert_eq!(merged.to_json().unwrap(), json!({"list": ["a", "b"]}));
//! ```

pub mod apply;
pub mod compile;
pub mod error;
pub mod intent;
pub mod shadow;
pub mod state;

// Re-exports for convenience
pub use apply::{apply_intents, ApplyConfig, TestAgainst};
pub use compile::{compile_patch, validate_json, CompileOptions, JsonValidation, Semantics};
pub use error::{EngineError, PatchError, PatchErrorKind};
pub use intent::{CompiledIntent, InsertPos, Intent, SetMode};
pub use shadow::{Shadow, ShadowKind, ShadowRef};
pub use state::{
    apply_patch_as_actor, crdt_to_full_replace, crdt_to_json_patch, ApplyOptions, ForkOptions,
    InPlaceOptions, State, StateMergeOptions, StateOptions,
};

// The patch vocabulary, re-exported so façade users need only this crate.
pub use patch_model::{Patch, PatchOp, Pointer};
