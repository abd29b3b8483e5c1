//! # crdt_doc
//!
//! A JSON-shaped CRDT document for state-based replication.
//!
//! Arbitrary JSON is represented as a tree of three node kinds:
//!
//! - **LWW registers** for primitives (and values written atomically)
//! - **Observed-remove maps** with delete-wins tombstones for objects
//! - **RGA sequences** with lineage links for arrays
//!
//! Peers mutate their own replica, stamping every write with a dot minted
//! from a per-actor [`Clock`], then exchange full states and [`merge_doc`]
//! them; merge is commutative, associative and idempotent, so any exchange
//! order converges. Tombstones can be pruned once causally stable via
//! [`compact_doc_tombstones`].
//!
//! # Example
//!
//! ```
//! use crdt_doc::{Clock, Doc, materialize_doc, merge_doc, MergeOptions};
//! use serde_json::json;
//!
//! let mut clock = Clock::parse("peer-a", 0).unwrap();
//! let doc = Doc::from_json(&json!({"greeting": "hello"}), &mut || clock.next()).unwrap();
//!
//! let other = doc.clone();
//! let merged = merge_doc(&doc, &other, &MergeOptions::default()).unwrap();
//! assert_eq!(materialize_doc(&merged).unwrap(), json!({"greeting": "hello"}));
//! ```

pub mod clock;
pub mod compact;
pub mod doc;
pub mod dot;
pub mod error;
pub mod materialize;
pub mod merge;
pub mod node;
pub mod rga;
pub mod wire;

// Re-exports for convenience
pub use clock::{Clock, VersionVector};
pub use compact::{compact_doc, compact_doc_in_place, CompactStats};
pub use doc::{json_to_node, Doc, MAX_TRAVERSAL_DEPTH, ROOT_KEY};
pub use dot::{ActorId, Anchor, Dot, ElemId, HEAD};
pub use error::{ClockError, DocError, DocResult, MergeError, WireError, WireReason};
pub use materialize::{materialize_doc, materialize_node};
pub use merge::{merge_doc, merge_nodes, MergeOptions};
pub use node::{LeafNode, MapEntry, MapNode, Node, NodeKind};
pub use rga::{SeqElem, SeqNode};
pub use wire::{deserialize_doc, doc_from_wire, doc_to_wire, serialize_doc, WireDoc, WireNode};

/// Alias matching the common CRDT naming for tombstone pruning.
pub use compact::compact_doc as compact_doc_tombstones;
