//! State-based merge of two replicated documents.
//!
//! The merge is commutative, associative and idempotent at the node level:
//!
//! - registers keep the greater dot
//! - maps apply delete-wins per key and union tombstones by max dot
//! - sequences union elements by id, requiring identical lineage for shared
//!   ids, OR-ing tombstones and keeping the earliest delete dot
//! - nodes of different kinds resolve to the side written most recently
//!
//! The traversal is iterative (task + result stacks) and bounded by
//! [`MAX_TRAVERSAL_DEPTH`].

use crate::doc::{Doc, MAX_TRAVERSAL_DEPTH};
use crate::dot::{Anchor, Dot, ElemId};
use crate::error::MergeError;
use crate::node::{MapEntry, MapNode, Node};
use crate::rga::{SeqElem, SeqNode};
use std::collections::BTreeMap;

/// Options for document merge.
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// When set (the default), two non-empty sequences at the same path that
    /// share no element at all are rejected as a lineage mismatch instead of
    /// being interleaved.
    pub require_shared_origin: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            require_shared_origin: true,
        }
    }
}

/// Merge two documents into a fresh one. Both inputs are left untouched.
///
/// The hidden root map is merged inline so that error paths start at the
/// user-visible root (`/list`, not `/root/list`).
pub fn merge_doc(a: &Doc, b: &Doc, opts: &MergeOptions) -> Result<Doc, MergeError> {
    tracing::debug!(
        require_shared_origin = opts.require_shared_origin,
        "merging documents"
    );
    use crate::doc::ROOT_KEY;

    let ma = a.root();
    let mb = b.root();
    let mut root = MapNode::new();

    let ea = ma.get(ROOT_KEY);
    let eb = mb.get(ROOT_KEY);
    let tomb = match (ma.tombstone(ROOT_KEY), mb.tombstone(ROOT_KEY)) {
        (Some(ta), Some(tb)) => Some(if ta >= tb { ta.clone() } else { tb.clone() }),
        (Some(t), None) | (None, Some(t)) => Some(t.clone()),
        (None, None) => None,
    };
    let entry_wins = match (ea, eb) {
        (Some(x), Some(y)) => Some(if x.dot >= y.dot { &x.dot } else { &y.dot }),
        (Some(x), None) => Some(&x.dot),
        (None, Some(y)) => Some(&y.dot),
        (None, None) => None,
    };
    let deleted = match (&tomb, entry_wins) {
        (Some(t), Some(winning)) => t >= winning,
        (Some(_), None) => true,
        (None, _) => false,
    };

    if deleted {
        root.insert_tombstone(ROOT_KEY.to_string(), tomb.expect("deleted implies tombstone"));
        return Ok(Doc::from_root(root));
    }
    if let Some(t) = tomb {
        root.insert_tombstone(ROOT_KEY.to_string(), t);
    }
    match (ea, eb) {
        (Some(x), Some(y)) => {
            let dot = if x.dot >= y.dot {
                x.dot.clone()
            } else {
                y.dot.clone()
            };
            let node = merge_nodes(&x.node, &y.node, opts)?;
            root.insert_entry(ROOT_KEY.to_string(), MapEntry { node, dot });
        }
        (Some(x), None) => root.insert_entry(ROOT_KEY.to_string(), x.clone()),
        (None, Some(y)) => root.insert_entry(ROOT_KEY.to_string(), y.clone()),
        (None, None) => {}
    }
    Ok(Doc::from_root(root))
}

/// How one key of a merged map gets its node.
enum EntryPlan<'a> {
    /// The entry exists on one side only; clone it.
    Clone(&'a MapEntry),
    /// Both sides carry the key; the child pair is merged recursively and
    /// the entry keeps the greater of the two entry dots.
    Recurse(Dot),
}

/// How one element of a merged sequence gets its value.
enum ElemPlan<'a> {
    /// The element exists on one side only; clone it.
    Clone(&'a SeqElem),
    /// Shared element: lineage fields verified equal, values merged
    /// recursively, tombstone state OR-ed with the earliest delete dot.
    Recurse {
        id: ElemId,
        prev: Anchor,
        ins_dot: Dot,
        tombstone: bool,
        del_dot: Option<Dot>,
    },
}

struct PairTask<'a> {
    a: &'a Node,
    b: &'a Node,
    path: String,
    depth: usize,
}

enum Task<'a> {
    /// Merge a pair of nodes; leaves one node on the result stack.
    Pair(PairTask<'a>),
    /// Assemble a merged map from its per-key plan, consuming one result per
    /// `Recurse` entry (results pop in plan order).
    BuildMap {
        plan: Vec<(String, EntryPlan<'a>)>,
        tombstones: BTreeMap<String, Dot>,
    },
    /// Assemble a merged sequence from its per-element plan.
    BuildSeq { plan: Vec<ElemPlan<'a>> },
}

/// Merge two nodes iteratively.
pub fn merge_nodes(a: &Node, b: &Node, opts: &MergeOptions) -> Result<Node, MergeError> {
    let mut tasks: Vec<Task<'_>> = vec![Task::Pair(PairTask {
        a,
        b,
        path: String::new(),
        depth: 0,
    })];
    let mut results: Vec<Node> = Vec::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Pair(pair) => {
                if pair.depth >= MAX_TRAVERSAL_DEPTH {
                    return Err(MergeError::DepthExceeded { path: pair.path });
                }
                merge_pair(pair, &mut tasks, &mut results, opts)?;
            }
            Task::BuildMap { plan, tombstones } => {
                let mut map = MapNode::new();
                for (key, entry_plan) in plan {
                    match entry_plan {
                        EntryPlan::Clone(entry) => map.insert_entry(key, entry.clone()),
                        EntryPlan::Recurse(dot) => {
                            let node = results.pop().expect("one result per recursion");
                            map.insert_entry(key, MapEntry { node, dot });
                        }
                    }
                }
                for (key, dot) in tombstones {
                    map.insert_tombstone(key, dot);
                }
                results.push(Node::Map(map));
            }
            Task::BuildSeq { plan } => {
                let mut seq = SeqNode::new();
                for elem_plan in plan {
                    match elem_plan {
                        ElemPlan::Clone(elem) => seq.insert_elem(elem.clone()),
                        ElemPlan::Recurse {
                            id,
                            prev,
                            ins_dot,
                            tombstone,
                            del_dot,
                        } => {
                            let value = results.pop().expect("one result per recursion");
                            seq.insert_elem(SeqElem {
                                id,
                                prev,
                                ins_dot,
                                tombstone,
                                del_dot,
                                value,
                            });
                        }
                    }
                }
                results.push(Node::Seq(seq));
            }
        }
    }

    Ok(results.pop().expect("the root pair leaves one result"))
}

fn merge_pair<'a>(
    pair: PairTask<'a>,
    tasks: &mut Vec<Task<'a>>,
    results: &mut Vec<Node>,
    opts: &MergeOptions,
) -> Result<(), MergeError> {
    let PairTask { a, b, path, depth } = pair;
    match (a, b) {
        (Node::Leaf(la), Node::Leaf(lb)) => {
            let winner = if la.dot >= lb.dot { a } else { b };
            results.push(winner.clone());
        }
        (Node::Map(ma), Node::Map(mb)) => {
            let (plan, tombstones, children) = plan_map(ma, mb, &path, depth)?;
            // Children are pushed above the build task in plan order; they
            // therefore execute last-first and their results pop back in
            // plan order when the build task runs.
            tasks.push(Task::BuildMap { plan, tombstones });
            for child in children {
                tasks.push(Task::Pair(child));
            }
        }
        (Node::Seq(sa), Node::Seq(sb)) => {
            let (plan, children) = plan_seq(sa, sb, &path, depth, opts)?;
            tasks.push(Task::BuildSeq { plan });
            for child in children {
                tasks.push(Task::Pair(child));
            }
        }
        _ => {
            // Kind mismatch: the side with the most recent write anywhere in
            // its subtree wins; the node kind tag keeps ties deterministic
            // and symmetric.
            let key_a = (a.representative_dot(), a.kind().tag());
            let key_b = (b.representative_dot(), b.kind().tag());
            let winner = if key_a >= key_b { a } else { b };
            results.push(winner.clone());
        }
    }
    Ok(())
}

#[allow(clippy::type_complexity)]
fn plan_map<'a>(
    a: &'a MapNode,
    b: &'a MapNode,
    path: &str,
    depth: usize,
) -> Result<
    (
        Vec<(String, EntryPlan<'a>)>,
        BTreeMap<String, Dot>,
        Vec<PairTask<'a>>,
    ),
    MergeError,
> {
    let mut keys: Vec<&String> = a
        .entries()
        .keys()
        .chain(b.entries().keys())
        .chain(a.tombstones().keys())
        .chain(b.tombstones().keys())
        .collect();
    keys.sort();
    keys.dedup();

    let mut plan: Vec<(String, EntryPlan<'a>)> = Vec::new();
    let mut tombstones: BTreeMap<String, Dot> = BTreeMap::new();
    let mut children: Vec<PairTask<'a>> = Vec::new();

    for key in keys {
        let ea = a.get(key);
        let eb = b.get(key);
        let tomb = match (a.tombstone(key), b.tombstone(key)) {
            (Some(ta), Some(tb)) => Some(if ta >= tb { ta.clone() } else { tb.clone() }),
            (Some(t), None) | (None, Some(t)) => Some(t.clone()),
            (None, None) => None,
        };
        let entry_wins = match (ea, eb) {
            (Some(x), Some(y)) => Some(if x.dot >= y.dot { &x.dot } else { &y.dot }),
            (Some(x), None) => Some(&x.dot),
            (None, Some(y)) => Some(&y.dot),
            (None, None) => None,
        };

        let deleted = match (&tomb, entry_wins) {
            (Some(t), Some(winning)) => t >= winning,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if deleted {
            tombstones.insert(key.clone(), tomb.expect("deleted implies tombstone"));
            continue;
        }
        if let Some(t) = tomb {
            // Superseded delete: kept so stale peers still observe it.
            tombstones.insert(key.clone(), t);
        }
        match (ea, eb) {
            (Some(x), Some(y)) => {
                let dot = if x.dot >= y.dot {
                    x.dot.clone()
                } else {
                    y.dot.clone()
                };
                children.push(PairTask {
                    a: &x.node,
                    b: &y.node,
                    path: format!("{}/{}", path, escape_token(key)),
                    depth: depth + 1,
                });
                plan.push((key.clone(), EntryPlan::Recurse(dot)));
            }
            (Some(x), None) => plan.push((key.clone(), EntryPlan::Clone(x))),
            (None, Some(y)) => plan.push((key.clone(), EntryPlan::Clone(y))),
            (None, None) => {}
        }
    }
    Ok((plan, tombstones, children))
}

#[allow(clippy::type_complexity)]
fn plan_seq<'a>(
    a: &'a SeqNode,
    b: &'a SeqNode,
    path: &str,
    depth: usize,
    opts: &MergeOptions,
) -> Result<(Vec<ElemPlan<'a>>, Vec<PairTask<'a>>), MergeError> {
    if opts.require_shared_origin && a.stored_len() > 0 && b.stored_len() > 0 {
        let shares_any = a.elems().any(|e| b.contains(&e.id));
        if !shares_any {
            return Err(MergeError::LineageMismatch {
                path: path.to_string(),
                detail: "sequences share no element".to_string(),
            });
        }
    }

    let mut ids: Vec<&ElemId> = a
        .elems()
        .map(|e| &e.id)
        .chain(b.elems().map(|e| &e.id))
        .collect();
    ids.sort();
    ids.dedup();

    let mut plan: Vec<ElemPlan<'a>> = Vec::new();
    let mut children: Vec<PairTask<'a>> = Vec::new();
    for id in ids {
        match (a.get(id), b.get(id)) {
            (Some(x), Some(y)) => {
                if x.prev != y.prev {
                    return Err(MergeError::LineageMismatch {
                        path: path.to_string(),
                        detail: format!("element {} disagrees on prev", id),
                    });
                }
                if x.ins_dot != y.ins_dot {
                    return Err(MergeError::LineageMismatch {
                        path: path.to_string(),
                        detail: format!("element {} disagrees on ins_dot", id),
                    });
                }
                let tombstone = x.tombstone || y.tombstone;
                let del_dot = match (&x.del_dot, &y.del_dot) {
                    (Some(dx), Some(dy)) => Some(if dx <= dy { dx.clone() } else { dy.clone() }),
                    (Some(d), None) | (None, Some(d)) => Some(d.clone()),
                    (None, None) => None,
                };
                children.push(PairTask {
                    a: &x.value,
                    b: &y.value,
                    path: format!("{}/{}", path, id),
                    depth: depth + 1,
                });
                plan.push(ElemPlan::Recurse {
                    id: id.clone(),
                    prev: x.prev.clone(),
                    ins_dot: x.ins_dot.clone(),
                    tombstone,
                    del_dot,
                });
            }
            (Some(x), None) => plan.push(ElemPlan::Clone(x)),
            (None, Some(y)) => plan.push(ElemPlan::Clone(y)),
            (None, None) => unreachable!("id came from one of the sides"),
        }
    }
    Ok((plan, children))
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
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

    fn merged_json(a: &Doc, b: &Doc) -> Value {
        materialize_doc(&merge_doc(a, b, &MergeOptions::default()).unwrap()).unwrap()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (doc, _) = state(&json!({"a": [1, 2], "b": {"c": 3}}), "x");
        assert_eq!(merged_json(&doc, &doc), materialize_doc(&doc).unwrap());
    }

    #[test]
    fn test_merge_lww_register() {
        let (mut a, mut ca) = state(&json!({"k": 1}), "a");
        let b = a.clone();

        // "a" rewrites k with a later dot than anything in b.
        let dot = ca.next();
        a.root_value_mut()
            .unwrap()
            .as_map_mut()
            .unwrap()
            .set("k", Node::new_leaf(json!(9), dot.clone()), dot);

        assert_eq!(merged_json(&a, &b), json!({"k": 9}));
        assert_eq!(merged_json(&b, &a), json!({"k": 9}));
    }

    #[test]
    fn test_merge_delete_wins_over_concurrent_older_write() {
        let (origin, co) = state(&json!({"k": 1}), "o");
        let mut a = origin.clone();
        let mut b = origin.clone();

        // Peer "a" (lexicographically smaller) rewrites, peer "zz" deletes
        // with an equal counter; the delete's dot is greater.
        let mut ca = Clock::parse("a", co.ctr()).unwrap();
        let da = ca.next();
        a.root_value_mut()
            .unwrap()
            .as_map_mut()
            .unwrap()
            .set("k", Node::new_leaf(json!(2), da.clone()), da);

        let mut cz = Clock::parse("zz", co.ctr()).unwrap();
        let dz = cz.next();
        b.root_value_mut().unwrap().as_map_mut().unwrap().remove("k", dz);

        assert_eq!(merged_json(&a, &b), json!({}));
        assert_eq!(merged_json(&b, &a), json!({}));
    }

    #[test]
    fn test_merge_concurrent_map_inserts_union() {
        let (origin, co) = state(&json!({}), "o");
        let mut a = origin.clone();
        let mut b = origin.clone();

        let mut ca = Clock::parse("a", co.ctr()).unwrap();
        let da = ca.next();
        a.root_value_mut()
            .unwrap()
            .as_map_mut()
            .unwrap()
            .set("x", Node::new_leaf(json!(1), da.clone()), da);

        let mut cb = Clock::parse("b", co.ctr()).unwrap();
        let db = cb.next();
        b.root_value_mut()
            .unwrap()
            .as_map_mut()
            .unwrap()
            .set("y", Node::new_leaf(json!(2), db.clone()), db);

        let expect = json!({"x": 1, "y": 2});
        assert_eq!(merged_json(&a, &b), expect);
        assert_eq!(merged_json(&b, &a), expect);
    }

    #[test]
    fn test_merge_seq_union_is_commutative() {
        let (origin, co) = state(&json!({"list": ["a", "b"]}), "o");
        let mut a = origin.clone();
        let mut b = origin.clone();

        let append = |doc: &mut Doc, actor: &str, start: u64, v: &str| {
            let mut clock = Clock::parse(actor, start).unwrap();
            let seq = doc
                .root_value_mut()
                .unwrap()
                .as_map_mut()
                .unwrap()
                .get_mut("list")
                .unwrap()
                .node
                .as_seq_mut()
                .unwrap();
            let prev = seq.prev_for_insert_at(None);
            let d = clock.next();
            seq.insert_after(prev, d.elem_id(), d.clone(), Node::new_leaf(json!(v), d))
                .unwrap();
        };
        append(&mut a, "A", co.ctr(), "c");
        append(&mut b, "B", co.ctr(), "d");

        let ab = merged_json(&a, &b);
        let ba = merged_json(&b, &a);
        assert_eq!(ab, ba);
        // dot("B", n) > dot("A", n): B's element surfaces before A's.
        assert_eq!(ab, json!({"list": ["a", "b", "d", "c"]}));
    }

    #[test]
    fn test_merge_seq_tombstone_propagates() {
        let (origin, co) = state(&json!([1, 2]), "o");
        let mut a = origin.clone();
        let b = origin.clone();

        let mut ca = Clock::parse("a", co.ctr()).unwrap();
        let seq = a.root_value_mut().unwrap().as_seq_mut().unwrap();
        let ids = seq.linearize_ids();
        seq.delete(&ids[0], ca.next());

        assert_eq!(merged_json(&a, &b), json!([2]));
        assert_eq!(merged_json(&b, &a), json!([2]));
    }

    #[test]
    fn test_merge_keeps_earliest_del_dot() {
        let (origin, co) = state(&json!([1]), "o");
        let mut a = origin.clone();
        let mut b = origin.clone();

        let id = {
            let seq = origin.root_value().unwrap().as_seq().unwrap();
            seq.linearize_ids()[0].clone()
        };
        let mut ca = Clock::parse("a", co.ctr()).unwrap();
        let mut cb = Clock::parse("b", co.ctr() + 10).unwrap();
        let da = ca.next();
        let db = cb.next();
        a.root_value_mut().unwrap().as_seq_mut().unwrap().delete(&id, da.clone());
        b.root_value_mut().unwrap().as_seq_mut().unwrap().delete(&id, db);

        let merged = merge_doc(&a, &b, &MergeOptions::default()).unwrap();
        let seq = merged.root_value().unwrap().as_seq().unwrap();
        assert_eq!(seq.get(&id).unwrap().del_dot, Some(da));
    }

    #[test]
    fn test_merge_lineage_mismatch_on_prev_disagreement() {
        let (origin, co) = state(&json!({"list": [1, 2]}), "o");
        let mut a = origin.clone();
        let mut b = origin.clone();

        let seq_of: for<'a> fn(&'a mut Doc) -> &'a mut SeqNode = |doc: &mut Doc| -> &mut SeqNode {
            doc.root_value_mut()
                .unwrap()
                .as_map_mut()
                .unwrap()
                .get_mut("list")
                .unwrap()
                .node
                .as_seq_mut()
                .unwrap()
        };

        // Both sides fabricate the same element id with different prevs.
        let d = Dot::new(crate::dot::ActorId::new("x").unwrap(), co.ctr() + 1).unwrap();
        {
            let seq = seq_of(&mut a);
            let ids = seq.linearize_ids();
            seq.insert_after(
                Anchor::Elem(ids[0].clone()),
                d.elem_id(),
                d.clone(),
                Node::new_leaf(json!(0), d.clone()),
            )
            .unwrap();
        }
        {
            let seq = seq_of(&mut b);
            let ids = seq.linearize_ids();
            seq.insert_after(
                Anchor::Elem(ids[1].clone()),
                d.elem_id(),
                d.clone(),
                Node::new_leaf(json!(0), d),
            )
            .unwrap();
        }

        let err = merge_doc(&a, &b, &MergeOptions::default()).unwrap_err();
        match err {
            MergeError::LineageMismatch { path, detail } => {
                assert_eq!(path, "/list");
                assert!(detail.contains("prev"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_merge_disjoint_sequences_rejected_by_default() {
        let (a, _) = state(&json!([1]), "a");
        let (b, _) = state(&json!([2]), "b");
        let err = merge_doc(&a, &b, &MergeOptions::default()).unwrap_err();
        assert!(matches!(err, MergeError::LineageMismatch { .. }));

        // Relaxed merge interleaves by dot order instead.
        let merged = merge_doc(
            &a,
            &b,
            &MergeOptions {
                require_shared_origin: false,
            },
        )
        .unwrap();
        let json = materialize_doc(&merged).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_merge_kind_mismatch_newer_side_wins() {
        let (a, ca) = state(&json!({"k": {"x": 1}}), "a");
        let (mut b, _) = state(&json!({"k": {"x": 1}}), "a");

        // b rewrites k as a register with a later dot.
        let mut cb = Clock::parse("zz", ca.ctr() + 5).unwrap();
        let d = cb.next();
        b.root_value_mut()
            .unwrap()
            .as_map_mut()
            .unwrap()
            .set("k", Node::new_leaf(json!("flat"), d.clone()), d);

        assert_eq!(merged_json(&a, &b), json!({"k": "flat"}));
        assert_eq!(merged_json(&b, &a), json!({"k": "flat"}));
    }

    #[test]
    fn test_merge_commutes_on_mixed_edits() {
        let (origin, co) = state(&json!({"m": {"x": 1}, "l": [1, 2, 3]}), "o");
        let mut a = origin.clone();
        let mut b = origin.clone();

        let mut ca = Clock::parse("p1", co.ctr()).unwrap();
        {
            let root = a.root_value_mut().unwrap().as_map_mut().unwrap();
            let d = ca.next();
            root.get_mut("m")
                .unwrap()
                .node
                .as_map_mut()
                .unwrap()
                .set("y", Node::new_leaf(json!(2), d.clone()), d);
            let seq = root.get_mut("l").unwrap().node.as_seq_mut().unwrap();
            let ids = seq.linearize_ids();
            seq.delete(&ids[0], ca.next());
        }

        let mut cb = Clock::parse("p2", co.ctr()).unwrap();
        {
            let root = b.root_value_mut().unwrap().as_map_mut().unwrap();
            let d = cb.next();
            root.remove("m", d);
            let seq = root.get_mut("l").unwrap().node.as_seq_mut().unwrap();
            let prev = seq.prev_for_insert_at(None);
            let d = cb.next();
            seq.insert_after(prev, d.elem_id(), d.clone(), Node::new_leaf(json!(4), d))
                .unwrap();
        }

        assert_eq!(merged_json(&a, &b), merged_json(&b, &a));
    }
}
