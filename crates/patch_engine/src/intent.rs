//! Typed intents: the closed instruction set between compiler and applier.
//!
//! A patch operation compiles into zero or more intents (a `move` becomes a
//! delete and an insert, a self-move becomes nothing). Intent paths live in
//! *slot space*: the virtual root entry's key is the first token, so a
//! patch path `/a/0` becomes the slot path `[ROOT_KEY, "a", "0"]` and a
//! root-level write addresses `[ROOT_KEY]` itself. Array positions inside
//! paths stay as index tokens; the applier maps them to element ids against
//! the base snapshot.

use patch_model::Pointer;
use serde_json::Value;

/// How an `ObjSet` treats the existing entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetMode {
    /// RFC `add`: write whether or not the key exists.
    Add,
    /// RFC `replace`: the key must already exist.
    Replace,
}

/// Target position of an array insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertPos {
    /// Insert so the element lands at this index.
    At(usize),
    /// Append past the last element (`-` / index at or past the length).
    End,
}

/// One compiled instruction against the replicated document.
#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    /// Write `key` in the map at `parent`.
    ObjSet {
        /// Slot path of the parent map.
        parent: Pointer,
        /// Key to write.
        key: String,
        /// JSON value to store.
        value: Value,
        /// Add/replace gating; `None` for root writes.
        mode: Option<SetMode>,
    },
    /// Remove `key` from the map at `parent`.
    ObjRemove {
        /// Slot path of the parent map.
        parent: Pointer,
        /// Key to remove.
        key: String,
    },
    /// Insert into the sequence at `parent`.
    ArrInsert {
        /// Slot path of the sequence.
        parent: Pointer,
        /// Where the element lands.
        index: InsertPos,
        /// JSON value to insert.
        value: Value,
    },
    /// Delete the element at `index` of the sequence at `parent`.
    ArrDelete {
        /// Slot path of the sequence.
        parent: Pointer,
        /// Base-mapped index of the element.
        index: usize,
    },
    /// Replace the element at `index` of the sequence at `parent`.
    ArrReplace {
        /// Slot path of the sequence.
        parent: Pointer,
        /// Base-mapped index of the element.
        index: usize,
        /// Replacement JSON value.
        value: Value,
    },
    /// Assert that the subtree at `path` materializes to `value`.
    Test {
        /// Slot path of the asserted subtree.
        path: Pointer,
        /// Expected JSON value.
        value: Value,
    },
}

/// An intent tagged with the patch operation it was compiled from.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledIntent {
    /// The instruction.
    pub intent: Intent,
    /// Index of the originating operation in the input patch.
    pub op_index: usize,
}

impl CompiledIntent {
    /// Pair an intent with its source op.
    pub fn new(intent: Intent, op_index: usize) -> Self {
        Self { intent, op_index }
    }
}
