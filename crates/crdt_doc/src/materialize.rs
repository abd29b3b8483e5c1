//! Rendering the replicated tree back into plain JSON.
//!
//! The walk is iterative: an explicit frame stack with a resumable cursor
//! per container, bounded by [`MAX_TRAVERSAL_DEPTH`]. Sequence frames
//! iterate over the cached linearized id list instead of snapshotting the
//! elements. Output objects are plain `serde_json` maps, so keys like
//! `__proto__` are carried as ordinary data.

use crate::doc::{Doc, MAX_TRAVERSAL_DEPTH};
use crate::dot::ElemId;
use crate::error::{DocError, DocResult};
use crate::node::Node;
use crate::rga::SeqNode;
use serde_json::{Map, Value};

/// Render a document to JSON. An empty document renders as `null`.
pub fn materialize_doc(doc: &Doc) -> DocResult<Value> {
    match doc.root_value() {
        Some(node) => materialize_node(node),
        None => Ok(Value::Null),
    }
}

/// Render one subtree to JSON. The tree is not modified.
pub fn materialize_node(node: &Node) -> DocResult<Value> {
    enum Frame<'a> {
        Obj {
            // (key, child) pairs in sorted key order; cursor into them.
            children: Vec<(&'a str, &'a Node)>,
            next: usize,
            out: Map<String, Value>,
        },
        Seq {
            seq: &'a SeqNode,
            ids: Vec<ElemId>,
            next: usize,
            out: Vec<Value>,
        },
    }

    impl<'a> Frame<'a> {
        fn for_node(node: &'a Node) -> Result<Frame<'a>, &'a Value> {
            match node {
                Node::Leaf(leaf) => Err(&leaf.value),
                Node::Map(map) => Ok(Frame::Obj {
                    children: map
                        .entries()
                        .iter()
                        .map(|(k, e)| (k.as_str(), &e.node))
                        .collect(),
                    next: 0,
                    out: Map::new(),
                }),
                Node::Seq(seq) => {
                    let ids = seq.linearize_ids();
                    Ok(Frame::Seq {
                        seq,
                        out: Vec::with_capacity(ids.len()),
                        ids,
                        next: 0,
                    })
                }
            }
        }

        fn attach(&mut self, value: Value) {
            match self {
                Frame::Obj { children, next, out } => {
                    let (key, _) = children[*next - 1];
                    out.insert(key.to_string(), value);
                }
                Frame::Seq { out, .. } => out.push(value),
            }
        }

        fn finish(self) -> Value {
            match self {
                Frame::Obj { out, .. } => Value::Object(out),
                Frame::Seq { out, .. } => Value::Array(out),
            }
        }
    }

    let first = match Frame::for_node(node) {
        Err(value) => return Ok(value.clone()),
        Ok(frame) => frame,
    };

    let mut stack: Vec<Frame<'_>> = vec![first];
    loop {
        let child: Option<&Node> = {
            let top = stack.last_mut().expect("stack is non-empty");
            match top {
                Frame::Obj { children, next, .. } => {
                    if *next < children.len() {
                        let node = children[*next].1;
                        *next += 1;
                        Some(node)
                    } else {
                        None
                    }
                }
                Frame::Seq { seq, ids, next, .. } => {
                    if *next < ids.len() {
                        // Copy the shared reference out so the returned
                        // child borrows the tree, not this stack frame.
                        let seq: &SeqNode = *seq;
                        let elem = seq
                            .get(&ids[*next])
                            .expect("linearized ids refer to stored elements");
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
                Err(value) => stack.last_mut().unwrap().attach(value.clone()),
                Ok(frame) => {
                    if stack.len() >= MAX_TRAVERSAL_DEPTH {
                        return Err(DocError::DepthExceeded {
                            path: String::new(),
                        });
                    }
                    stack.push(frame);
                }
            },
            None => {
                let done = stack.pop().unwrap().finish();
                match stack.last_mut() {
                    Some(parent) => parent.attach(done),
                    None => return Ok(done),
                }
            }
        }
    }
}
