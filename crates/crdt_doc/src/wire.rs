//! Canonical external form of a document.
//!
//! Every field of the in-memory tree is preserved: node kinds (tagged
//! `"lww"` / `"obj"` / `"seq"`), dots, map tombstones, sequence lineage and
//! delete dots. Deserialization is strict: shape errors are caught by serde,
//! and a validating conversion re-checks the structural invariants:
//! non-empty actors, positive counters, `mapKey == element.id`, resolvable
//! and acyclic predecessors, bounded depth.
//!
//! Tombstoned elements without a `del_dot` are accepted for compatibility
//! with older snapshots and simply stay non-compactable; on output `del_dot`
//! is always written when present.

use crate::doc::{Doc, MAX_TRAVERSAL_DEPTH};
use crate::dot::{ActorId, Anchor, Dot, ElemId, HEAD};
use crate::error::{WireError, WireReason};
use crate::node::{MapEntry, MapNode, Node};
use crate::rga::{SeqElem, SeqNode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Wire form of a dot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireDot {
    /// Writing actor.
    pub actor: String,
    /// Per-actor counter.
    pub ctr: u64,
}

impl From<&Dot> for WireDot {
    fn from(dot: &Dot) -> Self {
        Self {
            actor: dot.actor.as_str().to_string(),
            ctr: dot.ctr,
        }
    }
}

/// Wire form of a live map entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireEntry {
    /// Entry write dot.
    pub dot: WireDot,
    /// The child node.
    pub node: WireNode,
}

/// Wire form of a sequence element.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireElem {
    /// Element id, `"actor:ctr"` of the insertion dot.
    pub id: String,
    /// Predecessor id or `"HEAD"`.
    pub prev: String,
    /// Insertion dot.
    pub ins_dot: WireDot,
    /// Deletion marker.
    #[serde(default)]
    pub tombstone: bool,
    /// Dot of the delete event; absent only in pre-del-dot snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub del_dot: Option<WireDot>,
    /// The element value.
    pub value: WireNode,
}

/// Wire form of a node, tagged by kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WireNode {
    /// Last-writer-wins register.
    #[serde(rename = "lww")]
    Lww {
        /// Stored JSON value.
        value: Value,
        /// Winning write dot.
        dot: WireDot,
    },
    /// Observed-remove map.
    #[serde(rename = "obj")]
    Obj {
        /// Live entries by key.
        entries: BTreeMap<String, WireEntry>,
        /// Delete tombstones by key.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        tombstones: BTreeMap<String, WireDot>,
    },
    /// RGA sequence.
    #[serde(rename = "seq")]
    Seq {
        /// Elements keyed by their id.
        elems: BTreeMap<String, WireElem>,
    },
}

/// Wire form of a whole document: its hidden root map.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WireDoc {
    /// The hidden root map (an `"obj"` node).
    pub root: WireNode,
}

/// Convert a document to its wire form.
pub fn doc_to_wire(doc: &Doc) -> WireDoc {
    WireDoc {
        root: map_to_wire(doc.root()),
    }
}

/// Validate a wire document and build the in-memory form.
pub fn doc_from_wire(wire: WireDoc) -> Result<Doc, WireError> {
    let root = wire_to_node(wire.root, String::new())?;
    match root {
        Node::Map(map) => Ok(Doc::from_root(map)),
        _ => Err(WireError::new(
            WireReason::InvalidShape,
            "",
            "document root must be an obj node",
        )),
    }
}

/// Serialize a document to canonical JSON text.
pub fn serialize_doc(doc: &Doc) -> Result<String, WireError> {
    serde_json::to_string(&doc_to_wire(doc))
        .map_err(|e| WireError::new(WireReason::InvalidShape, "", e.to_string()))
}

/// Parse and strictly validate a document from JSON text.
pub fn deserialize_doc(text: &str) -> Result<Doc, WireError> {
    let wire: WireDoc = serde_json::from_str(text)
        .map_err(|e| WireError::new(WireReason::InvalidShape, "", e.to_string()))?;
    doc_from_wire(wire)
}

impl Serialize for Doc {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        doc_to_wire(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Doc {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireDoc::deserialize(deserializer)?;
        doc_from_wire(wire).map_err(serde::de::Error::custom)
    }
}

fn map_to_wire(map: &MapNode) -> WireNode {
    match node_to_wire(&Node::Map(map.clone())) {
        node @ WireNode::Obj { .. } => node,
        _ => unreachable!("a map converts to an obj node"),
    }
}

/// Convert one node to wire form, iteratively.
pub fn node_to_wire(node: &Node) -> WireNode {
    enum Frame<'a> {
        Obj {
            children: Vec<(&'a String, &'a MapEntry)>,
            next: usize,
            out: BTreeMap<String, WireEntry>,
            tombstones: BTreeMap<String, WireDot>,
        },
        Seq {
            children: Vec<&'a SeqElem>,
            next: usize,
            out: BTreeMap<String, WireElem>,
        },
    }

    impl<'a> Frame<'a> {
        fn for_node(node: &'a Node) -> Result<Frame<'a>, WireNode> {
            match node {
                Node::Leaf(leaf) => Err(WireNode::Lww {
                    value: leaf.value.clone(),
                    dot: WireDot::from(&leaf.dot),
                }),
                Node::Map(map) => Ok(Frame::Obj {
                    children: map.entries().iter().collect(),
                    next: 0,
                    out: BTreeMap::new(),
                    tombstones: map
                        .tombstones()
                        .iter()
                        .map(|(k, d)| (k.clone(), WireDot::from(d)))
                        .collect(),
                }),
                Node::Seq(seq) => Ok(Frame::Seq {
                    children: seq.elems().collect(),
                    next: 0,
                    out: BTreeMap::new(),
                }),
            }
        }

        fn attach(&mut self, node: WireNode) {
            match self {
                Frame::Obj {
                    children, next, out, ..
                } => {
                    let (key, entry) = children[*next - 1];
                    out.insert(
                        key.clone(),
                        WireEntry {
                            dot: WireDot::from(&entry.dot),
                            node,
                        },
                    );
                }
                Frame::Seq { children, next, out } => {
                    let elem = children[*next - 1];
                    out.insert(
                        elem.id.to_string(),
                        WireElem {
                            id: elem.id.to_string(),
                            prev: elem.prev.to_string(),
                            ins_dot: WireDot::from(&elem.ins_dot),
                            tombstone: elem.tombstone,
                            del_dot: elem.del_dot.as_ref().map(WireDot::from),
                            value: node,
                        },
                    );
                }
            }
        }

        fn finish(self) -> WireNode {
            match self {
                Frame::Obj { out, tombstones, .. } => WireNode::Obj {
                    entries: out,
                    tombstones,
                },
                Frame::Seq { out, .. } => WireNode::Seq { elems: out },
            }
        }
    }

    let first = match Frame::for_node(node) {
        Err(leaf) => return leaf,
        Ok(frame) => frame,
    };
    let mut stack = vec![first];
    loop {
        let child: Option<&Node> = {
            let top = stack.last_mut().expect("stack is non-empty");
            match top {
                Frame::Obj { children, next, .. } => {
                    if *next < children.len() {
                        let entry: &MapEntry = children[*next].1;
                        *next += 1;
                        Some(&entry.node)
                    } else {
                        None
                    }
                }
                Frame::Seq { children, next, .. } => {
                    if *next < children.len() {
                        let elem: &SeqElem = children[*next];
                        *next += 1;
                        Some(&elem.value)
                    } else {
                        None
                    }
                }
            }
        };
        match child {
            Some(node) => match Frame::for_node(node) {
                Err(leaf) => stack.last_mut().unwrap().attach(leaf),
                Ok(frame) => stack.push(frame),
            },
            None => {
                let done = stack.pop().unwrap().finish();
                match stack.last_mut() {
                    Some(parent) => parent.attach(done),
                    None => return done,
                }
            }
        }
    }
}

fn check_dot(dot: &WireDot, path: &str) -> Result<Dot, WireError> {
    if dot.actor.is_empty() {
        return Err(WireError::new(
            WireReason::InvalidInvariant,
            path,
            "dot actor must be non-empty",
        ));
    }
    if dot.ctr == 0 {
        return Err(WireError::new(
            WireReason::InvalidInvariant,
            path,
            "dot ctr must be positive",
        ));
    }
    Ok(Dot {
        actor: ActorId::new(dot.actor.clone()).expect("checked non-empty"),
        ctr: dot.ctr,
    })
}

/// Check that every predecessor resolves and that following predecessors
/// never cycles: all elements must be reachable from the origin.
fn check_lineage(elems: &BTreeMap<String, WireElem>, path: &str) -> Result<(), WireError> {
    let keys: BTreeSet<&str> = elems.keys().map(|k| k.as_str()).collect();
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut roots: Vec<&str> = Vec::new();
    for (key, elem) in elems {
        if elem.prev == HEAD {
            roots.push(key);
        } else if keys.contains(elem.prev.as_str()) {
            children.entry(elem.prev.as_str()).or_default().push(key);
        } else {
            return Err(WireError::new(
                WireReason::InvalidInvariant,
                format!("{}/{}", path, key),
                format!("prev {} does not resolve within the sequence", elem.prev),
            ));
        }
    }

    let mut reached = 0usize;
    let mut stack = roots;
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    while let Some(key) = stack.pop() {
        if !seen.insert(key) {
            continue;
        }
        reached += 1;
        if let Some(kids) = children.get(key) {
            stack.extend(kids.iter().copied());
        }
    }
    if reached != elems.len() {
        return Err(WireError::new(
            WireReason::CyclicPredecessors,
            path,
            "predecessor references form a cycle",
        ));
    }
    Ok(())
}

/// Validate a wire node and build the in-memory form, iteratively.
pub fn wire_to_node(wire: WireNode, root_path: String) -> Result<Node, WireError> {
    enum Frame {
        Obj {
            // (key, dot, child) waiting to be consumed in order.
            pending: Vec<(String, Dot, WireNode)>,
            next: usize,
            out: MapNode,
            path: String,
        },
        Seq {
            pending: Vec<(ElemId, Anchor, Dot, bool, Option<Dot>, WireNode)>,
            next: usize,
            out: SeqNode,
            path: String,
        },
    }

    fn open(wire: WireNode, path: String) -> Result<Result<Frame, Node>, WireError> {
        match wire {
            WireNode::Lww { value, dot } => {
                let dot = check_dot(&dot, &path)?;
                Ok(Err(Node::new_leaf(value, dot)))
            }
            WireNode::Obj { entries, tombstones } => {
                let mut out = MapNode::new();
                for (key, dot) in &tombstones {
                    let dot = check_dot(dot, &format!("{}/{}", path, key))?;
                    out.insert_tombstone(key.clone(), dot);
                }
                let mut pending = Vec::with_capacity(entries.len());
                for (key, entry) in entries {
                    let child_path = format!("{}/{}", path, key);
                    let dot = check_dot(&entry.dot, &child_path)?;
                    if let Some(tomb) = tombstones.get(&key) {
                        let tomb = check_dot(tomb, &child_path)?;
                        if tomb >= dot {
                            return Err(WireError::new(
                                WireReason::InvalidInvariant,
                                child_path,
                                "live entry is dominated by its tombstone",
                            ));
                        }
                    }
                    pending.push((key, dot, entry.node));
                }
                Ok(Ok(Frame::Obj {
                    pending,
                    next: 0,
                    out,
                    path,
                }))
            }
            WireNode::Seq { elems } => {
                check_lineage(&elems, &path)?;
                let mut pending = Vec::with_capacity(elems.len());
                for (key, elem) in elems {
                    let child_path = format!("{}/{}", path, key);
                    if key != elem.id {
                        return Err(WireError::new(
                            WireReason::InvalidInvariant,
                            child_path,
                            "sequence map key does not match element id",
                        ));
                    }
                    let ins_dot = check_dot(&elem.ins_dot, &child_path)?;
                    let id = ElemId::parse(&elem.id).map_err(|_| {
                        WireError::new(
                            WireReason::InvalidInvariant,
                            child_path.clone(),
                            "element id is not a valid actor:ctr pair",
                        )
                    })?;
                    if id != ins_dot.elem_id() {
                        return Err(WireError::new(
                            WireReason::InvalidInvariant,
                            child_path,
                            "element id does not match its insertion dot",
                        ));
                    }
                    let prev = Anchor::parse(&elem.prev).map_err(|_| {
                        WireError::new(
                            WireReason::InvalidInvariant,
                            child_path.clone(),
                            "prev is neither HEAD nor a valid element id",
                        )
                    })?;
                    let del_dot = match elem.del_dot {
                        Some(d) => Some(check_dot(&d, &child_path)?),
                        None => None,
                    };
                    if del_dot.is_some() && !elem.tombstone {
                        return Err(WireError::new(
                            WireReason::InvalidInvariant,
                            child_path,
                            "del_dot present on a live element",
                        ));
                    }
                    pending.push((id, prev, ins_dot, elem.tombstone, del_dot, elem.value));
                }
                Ok(Ok(Frame::Seq {
                    pending,
                    next: 0,
                    out: SeqNode::new(),
                    path,
                }))
            }
        }
    }

    let first = match open(wire, root_path)? {
        Err(leaf) => return Ok(leaf),
        Ok(frame) => frame,
    };
    let mut stack = vec![first];
    loop {
        if stack.len() > MAX_TRAVERSAL_DEPTH {
            let path = match stack.last().unwrap() {
                Frame::Obj { path, .. } | Frame::Seq { path, .. } => path.clone(),
            };
            return Err(WireError::new(
                WireReason::DepthExceeded,
                path,
                "serialized tree exceeds the max traversal depth",
            ));
        }

        // Pull the next pending child off the top frame.
        let next_child: Option<(WireNode, String)> = {
            let top = stack.last_mut().expect("stack is non-empty");
            match top {
                Frame::Obj { pending, next, path, .. } => {
                    if *next < pending.len() {
                        let idx = *next;
                        *next += 1;
                        let child = std::mem::replace(
                            &mut pending[idx].2,
                            WireNode::Obj {
                                entries: BTreeMap::new(),
                                tombstones: BTreeMap::new(),
                            },
                        );
                        Some((child, format!("{}/{}", path, pending[idx].0)))
                    } else {
                        None
                    }
                }
                Frame::Seq { pending, next, path, .. } => {
                    if *next < pending.len() {
                        let idx = *next;
                        *next += 1;
                        let child = std::mem::replace(
                            &mut pending[idx].5,
                            WireNode::Obj {
                                entries: BTreeMap::new(),
                                tombstones: BTreeMap::new(),
                            },
                        );
                        Some((child, format!("{}/{}", path, pending[idx].0)))
                    } else {
                        None
                    }
                }
            }
        };

        match next_child {
            Some((wire, child_path)) => match open(wire, child_path)? {
                Err(leaf) => attach(stack.last_mut().unwrap(), leaf),
                Ok(frame) => stack.push(frame),
            },
            None => {
                let done = close(stack.pop().unwrap());
                match stack.last_mut() {
                    Some(parent) => attach(parent, done),
                    None => return Ok(done),
                }
            }
        }
    }

    fn attach(frame: &mut Frame, node: Node) {
        match frame {
            Frame::Obj { pending, next, out, .. } => {
                let (key, dot, _) = &pending[*next - 1];
                out.insert_entry(key.clone(), MapEntry {
                    node,
                    dot: dot.clone(),
                });
            }
            Frame::Seq { pending, next, out, .. } => {
                let (id, prev, ins_dot, tombstone, del_dot, _) = &pending[*next - 1];
                out.insert_elem(SeqElem {
                    id: id.clone(),
                    prev: prev.clone(),
                    ins_dot: ins_dot.clone(),
                    tombstone: *tombstone,
                    del_dot: del_dot.clone(),
                    value: node,
                });
            }
        }
    }

    fn close(frame: Frame) -> Node {
        match frame {
            Frame::Obj { out, .. } => Node::Map(out),
            Frame::Seq { out, .. } => Node::Seq(out),
        }
    }
}
