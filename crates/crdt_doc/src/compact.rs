//! Tombstone compaction under causal stability.
//!
//! A tombstone may be dropped once every peer has observed the delete that
//! produced it (its dot is covered by the stable version vector) and nothing
//! live still depends on it:
//!
//! - map tombstones: the key has no live entry
//! - sequence tombstones: no live element transitively anchors at the
//!   element, so removing it cannot orphan anything visible
//!
//! Compaction never changes the materialized JSON. A replica that compacted
//! against `stable` must not merge with a peer whose vector is behind
//! `stable`.

use crate::clock::VersionVector;
use crate::doc::{Doc, MAX_TRAVERSAL_DEPTH};
use crate::dot::{Anchor, Dot, ElemId};
use crate::error::{DocError, DocResult};
use crate::node::{MapEntry, MapNode, Node};
use crate::rga::{SeqElem, SeqNode};
use std::collections::{BTreeMap, BTreeSet};

/// What a compaction pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactStats {
    /// Map tombstones dropped.
    pub object_tombstones_removed: usize,
    /// Sequence elements dropped.
    pub sequence_tombstones_removed: usize,
}

/// Compact a copy of the document; the input is left untouched.
pub fn compact_doc(doc: &Doc, stable: &VersionVector) -> DocResult<(Doc, CompactStats)> {
    let mut copy = doc.clone();
    let stats = compact_doc_in_place(&mut copy, stable)?;
    Ok((copy, stats))
}

/// Compact the document in place, returning removal counts.
pub fn compact_doc_in_place(doc: &mut Doc, stable: &VersionVector) -> DocResult<CompactStats> {
    let mut stats = CompactStats::default();
    let root = std::mem::take(doc.root_mut());
    let compacted = compact_map(root, stable, &mut stats)?;
    *doc.root_mut() = compacted;
    tracing::debug!(
        object_tombstones_removed = stats.object_tombstones_removed,
        sequence_tombstones_removed = stats.sequence_tombstones_removed,
        "compacted document"
    );
    Ok(stats)
}

enum Task {
    Node { node: Node, depth: usize },
    BuildMap {
        entries: Vec<(String, Dot)>,
        tombstones: BTreeMap<String, Dot>,
    },
    BuildSeq {
        metas: Vec<ElemMeta>,
    },
}

struct ElemMeta {
    id: ElemId,
    prev: Anchor,
    ins_dot: Dot,
    tombstone: bool,
    del_dot: Option<Dot>,
}

fn compact_map(
    map: MapNode,
    stable: &VersionVector,
    stats: &mut CompactStats,
) -> DocResult<MapNode> {
    match compact_node(Node::Map(map), stable, stats)? {
        Node::Map(map) => Ok(map),
        _ => unreachable!("compacting a map yields a map"),
    }
}

fn compact_node(node: Node, stable: &VersionVector, stats: &mut CompactStats) -> DocResult<Node> {
    let mut tasks: Vec<Task> = vec![Task::Node { node, depth: 0 }];
    let mut results: Vec<Node> = Vec::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Node { node, depth } => {
                if depth >= MAX_TRAVERSAL_DEPTH {
                    return Err(DocError::DepthExceeded {
                        path: String::new(),
                    });
                }
                match node {
                    Node::Leaf(_) => results.push(node),
                    Node::Map(map) => open_map(map, stable, stats, depth, &mut tasks),
                    Node::Seq(seq) => open_seq(seq, stable, stats, depth, &mut tasks),
                }
            }
            Task::BuildMap { entries, tombstones } => {
                let mut map = MapNode::new();
                for (key, dot) in entries {
                    let node = results.pop().expect("one result per entry");
                    map.insert_entry(key, MapEntry { node, dot });
                }
                for (key, dot) in tombstones {
                    map.insert_tombstone(key, dot);
                }
                results.push(Node::Map(map));
            }
            Task::BuildSeq { metas } => {
                let mut seq = SeqNode::new();
                for meta in metas {
                    let value = results.pop().expect("one result per element");
                    seq.insert_elem(SeqElem {
                        id: meta.id,
                        prev: meta.prev,
                        ins_dot: meta.ins_dot,
                        tombstone: meta.tombstone,
                        del_dot: meta.del_dot,
                        value,
                    });
                }
                results.push(Node::Seq(seq));
            }
        }
    }
    Ok(results.pop().expect("the root task leaves one result"))
}

fn open_map(
    map: MapNode,
    stable: &VersionVector,
    stats: &mut CompactStats,
    depth: usize,
    tasks: &mut Vec<Task>,
) {
    let (map_entries, map_tombstones) = map.into_parts();

    let mut tombstones: BTreeMap<String, Dot> = BTreeMap::new();
    for (key, dot) in map_tombstones {
        let prunable = stable.contains_dot(&dot) && !map_entries.contains_key(&key);
        if prunable {
            stats.object_tombstones_removed += 1;
        } else {
            tombstones.insert(key, dot);
        }
    }

    let mut entries: Vec<(String, Dot)> = Vec::new();
    let mut children: Vec<Node> = Vec::new();
    // Disassemble in sorted order; the build task pops results back in the
    // same order.
    for (key, entry) in map_entries {
        entries.push((key, entry.dot));
        children.push(entry.node);
    }
    tasks.push(Task::BuildMap { entries, tombstones });
    for node in children {
        tasks.push(Task::Node {
            node,
            depth: depth + 1,
        });
    }
}

fn open_seq(
    seq: SeqNode,
    stable: &VersionVector,
    stats: &mut CompactStats,
    depth: usize,
    tasks: &mut Vec<Task>,
) {
    // An element must stay when it is live, or when its delete is not yet
    // causally stable (missing del_dot counts as unstable). Everything a
    // staying element anchors through must stay as well.
    let mut keep: BTreeSet<ElemId> = BTreeSet::new();
    for elem in seq.elems() {
        let stable_delete = elem
            .del_dot
            .as_ref()
            .map(|d| stable.contains_dot(d))
            .unwrap_or(false);
        if !(elem.tombstone && stable_delete) {
            // Mark the element and its whole anchor chain.
            let mut cursor = Some(elem.id.clone());
            while let Some(id) = cursor {
                if !keep.insert(id.clone()) {
                    break;
                }
                cursor = match seq.get(&id).map(|e| &e.prev) {
                    Some(Anchor::Elem(p)) => Some(p.clone()),
                    _ => None,
                };
            }
        }
    }

    let mut metas: Vec<ElemMeta> = Vec::new();
    let mut children: Vec<Node> = Vec::new();
    for (_, elem) in seq.into_elems() {
        if !keep.contains(&elem.id) {
            stats.sequence_tombstones_removed += 1;
            continue;
        }
        metas.push(ElemMeta {
            id: elem.id,
            prev: elem.prev,
            ins_dot: elem.ins_dot,
            tombstone: elem.tombstone,
            del_dot: elem.del_dot,
        });
        children.push(elem.value);
    }
    tasks.push(Task::BuildSeq { metas });
    for node in children {
        tasks.push(Task::Node {
            node,
            depth: depth + 1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::materialize::materialize_doc;
    use serde_json::{json, Value};

    fn state(value: &Value, actor: &str) -> (Doc, Clock) {
        let mut clock = Clock::parse(actor, 0).unwrap();
        let doc = Doc::from_json(value, &mut || clock.next()).unwrap();
        (doc, clock)
    }

    fn stable_for(doc: &Doc) -> VersionVector {
        let mut vv = VersionVector::new();
        doc.for_each_dot(|d| vv.observe_dot(d));
        vv
    }

    #[test]
    fn test_object_tombstones_pruned_when_covered() {
        let (mut doc, mut clock) = state(&json!({"a": 1, "b": 2}), "x");
        let d = clock.next();
        doc.root_value_mut().unwrap().as_map_mut().unwrap().remove("a", d);

        let before = materialize_doc(&doc).unwrap();
        let stable = stable_for(&doc);
        let (compacted, stats) = compact_doc(&doc, &stable).unwrap();

        assert_eq!(stats.object_tombstones_removed, 1);
        assert_eq!(materialize_doc(&compacted).unwrap(), before);
        let map = compacted.root_value().unwrap().as_map().unwrap();
        assert!(map.tombstone("a").is_none());
    }

    #[test]
    fn test_uncovered_tombstones_survive() {
        let (mut doc, mut clock) = state(&json!({"a": 1}), "x");
        let stable = stable_for(&doc); // snapshot before the delete
        let d = clock.next();
        doc.root_value_mut().unwrap().as_map_mut().unwrap().remove("a", d);

        let (compacted, stats) = compact_doc(&doc, &stable).unwrap();
        assert_eq!(stats.object_tombstones_removed, 0);
        let map = compacted.root_value().unwrap().as_map().unwrap();
        assert!(map.tombstone("a").is_some());
    }

    #[test]
    fn test_sequence_tombstones_pruned() {
        let (mut doc, mut clock) = state(&json!([1, 2, 3]), "x");
        {
            let seq = doc.root_value_mut().unwrap().as_seq_mut().unwrap();
            let ids = seq.linearize_ids();
            seq.delete(&ids[2], clock.next());
        }

        let before = materialize_doc(&doc).unwrap();
        let stable = stable_for(&doc);
        let (compacted, stats) = compact_doc(&doc, &stable).unwrap();

        assert_eq!(stats.sequence_tombstones_removed, 1);
        assert_eq!(materialize_doc(&compacted).unwrap(), before);
        let seq = compacted.root_value().unwrap().as_seq().unwrap();
        assert_eq!(seq.stored_len(), 2);
    }

    #[test]
    fn test_tombstone_with_live_child_is_kept() {
        let (mut doc, mut clock) = state(&json!(["a", "b"]), "x");
        {
            let seq = doc.root_value_mut().unwrap().as_seq_mut().unwrap();
            let ids = seq.linearize_ids();
            // Anchor a new element at ids[0], then delete ids[0].
            let d = clock.next();
            seq.insert_after(
                Anchor::Elem(ids[0].clone()),
                d.elem_id(),
                d.clone(),
                Node::new_leaf(json!("x"), d),
            )
            .unwrap();
            seq.delete(&ids[0], clock.next());
        }

        let before = materialize_doc(&doc).unwrap();
        let stable = stable_for(&doc);
        let (compacted, stats) = compact_doc(&doc, &stable).unwrap();

        // The tombstone anchors a live element; it must survive.
        assert_eq!(stats.sequence_tombstones_removed, 0);
        assert_eq!(materialize_doc(&compacted).unwrap(), before);
        let seq = compacted.root_value().unwrap().as_seq().unwrap();
        assert_eq!(seq.stored_len(), 3);
    }

    #[test]
    fn test_tombstone_chain_removed_together() {
        let (mut doc, mut clock) = state(&json!(["a", "b", "c"]), "x");
        {
            let seq = doc.root_value_mut().unwrap().as_seq_mut().unwrap();
            let ids = seq.linearize_ids();
            // Delete the whole tail: b (anchor of c) and c.
            seq.delete(&ids[1], clock.next());
            seq.delete(&ids[2], clock.next());
        }

        let stable = stable_for(&doc);
        let (compacted, stats) = compact_doc(&doc, &stable).unwrap();
        assert_eq!(stats.sequence_tombstones_removed, 2);
        assert_eq!(materialize_doc(&compacted).unwrap(), json!(["a"]));
    }

    #[test]
    fn test_missing_del_dot_is_not_compactable() {
        let (mut doc, mut clock) = state(&json!([1]), "x");
        let id = {
            let seq = doc.root_value_mut().unwrap().as_seq_mut().unwrap();
            let ids = seq.linearize_ids();
            seq.delete(&ids[0], clock.next());
            ids[0].clone()
        };
        // Simulate a pre-del-dot snapshot.
        {
            let seq = doc.root_value_mut().unwrap().as_seq_mut().unwrap();
            let mut elem = seq.get(&id).unwrap().clone();
            elem.del_dot = None;
            seq.insert_elem(elem);
        }

        let stable = stable_for(&doc);
        let (_, stats) = compact_doc(&doc, &stable).unwrap();
        assert_eq!(stats.sequence_tombstones_removed, 0);
    }

    #[test]
    fn test_in_place_compaction_mutates() {
        let (mut doc, mut clock) = state(&json!({"a": 1}), "x");
        let d = clock.next();
        doc.root_value_mut().unwrap().as_map_mut().unwrap().remove("a", d);
        let stable = stable_for(&doc);

        let stats = compact_doc_in_place(&mut doc, &stable).unwrap();
        assert_eq!(stats.object_tombstones_removed, 1);
        assert!(doc
            .root_value()
            .unwrap()
            .as_map()
            .unwrap()
            .tombstone("a")
            .is_none());
    }
}
