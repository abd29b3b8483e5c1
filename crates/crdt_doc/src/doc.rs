//! The replicated document wrapper and JSON→node construction.
//!
//! The user-visible root value lives under a single virtual entry
//! ([`ROOT_KEY`]) of a hidden top-level map. Routing root-level writes
//! through a map entry gives the document root the same last-writer-wins and
//! delete-wins semantics as any other slot.

use crate::dot::{Anchor, Dot};
use crate::error::{DocError, DocResult};
use crate::node::{MapNode, Node};
use crate::rga::SeqNode;
use serde_json::Value;

/// Key of the virtual root entry inside the hidden top-level map.
pub const ROOT_KEY: &str = "root";

/// Shared bound on every tree traversal (materialize, merge, construction,
/// wire validation).
pub const MAX_TRAVERSAL_DEPTH: usize = 10_000;

/// A replicated JSON document.
#[derive(Clone, Debug, Default)]
pub struct Doc {
    root: MapNode,
}

impl Doc {
    /// New document with no root value (materializes as `null`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document holding `value`, minting dots from `mint`.
    pub fn from_json(value: &Value, mint: &mut impl FnMut() -> Dot) -> DocResult<Self> {
        let node = json_to_node(value, mint)?;
        let mut root = MapNode::new();
        root.set(ROOT_KEY, node, mint());
        Ok(Self { root })
    }

    /// The hidden top-level map.
    pub fn root(&self) -> &MapNode {
        &self.root
    }

    /// Mutable access to the hidden top-level map.
    pub fn root_mut(&mut self) -> &mut MapNode {
        &mut self.root
    }

    /// The user-visible root node, if one has been written.
    pub fn root_value(&self) -> Option<&Node> {
        self.root.get(ROOT_KEY).map(|e| &e.node)
    }

    /// Mutable user-visible root node.
    pub fn root_value_mut(&mut self) -> Option<&mut Node> {
        self.root.get_mut(ROOT_KEY).map(|e| &mut e.node)
    }

    /// Construct a document directly from a root map (merge/deserialize).
    pub(crate) fn from_root(root: MapNode) -> Self {
        Self { root }
    }

    /// Visit every dot stored in the document.
    pub fn for_each_dot(&self, mut f: impl FnMut(&Dot)) {
        for entry in self.root.entries().values() {
            f(&entry.dot);
            entry.node.for_each_dot(&mut f);
        }
        for dot in self.root.tombstones().values() {
            f(dot);
        }
    }

    /// Highest counter stored anywhere in the document for `actor`.
    pub fn max_ctr_for_actor(&self, actor: &crate::dot::ActorId) -> u64 {
        let mut max = 0;
        self.for_each_dot(|dot| {
            if &dot.actor == actor && dot.ctr > max {
                max = dot.ctr;
            }
        });
        max
    }
}

/// Convert a JSON value into a fresh CRDT subtree.
///
/// Primitives become registers; objects become maps with one entry dot per
/// key; arrays become sequences whose elements chain off one another in
/// input order. The walk is iterative and bounded by
/// [`MAX_TRAVERSAL_DEPTH`].
pub fn json_to_node(value: &Value, mint: &mut impl FnMut() -> Dot) -> DocResult<Node> {
    // Containers under construction; leaves never enter the stack.
    enum Frame<'a> {
        Obj {
            entries: Vec<(&'a String, &'a Value)>,
            next: usize,
            out: MapNode,
        },
        Arr {
            items: &'a [Value],
            next: usize,
            out: SeqNode,
            last: Anchor,
        },
    }

    impl<'a> Frame<'a> {
        fn for_value(v: &'a Value) -> Frame<'a> {
            match v {
                Value::Object(map) => Frame::Obj {
                    entries: map.iter().collect(),
                    next: 0,
                    out: MapNode::new(),
                },
                Value::Array(items) => Frame::Arr {
                    items,
                    next: 0,
                    out: SeqNode::new(),
                    last: Anchor::Head,
                },
                _ => unreachable!("leaves never become frames"),
            }
        }
    }

    fn is_leaf(v: &Value) -> bool {
        !matches!(v, Value::Object(_) | Value::Array(_))
    }

    fn attach(frame: &mut Frame<'_>, node: Node, mint: &mut impl FnMut() -> Dot) {
        match frame {
            Frame::Obj { entries, next, out } => {
                let (key, _) = entries[*next - 1];
                out.set((*key).clone(), node, mint());
            }
            Frame::Arr { out, last, .. } => {
                let dot = mint();
                let id = dot.elem_id();
                out.insert_after(last.clone(), id.clone(), dot, node)
                    .expect("anchor was just produced by this builder");
                *last = Anchor::Elem(id);
            }
        }
    }

    fn finish(frame: Frame<'_>) -> Node {
        match frame {
            Frame::Obj { out, .. } => Node::Map(out),
            Frame::Arr { out, .. } => Node::Seq(out),
        }
    }

    if is_leaf(value) {
        return Ok(Node::new_leaf(value.clone(), mint()));
    }

    let mut stack: Vec<Frame<'_>> = vec![Frame::for_value(value)];
    loop {
        // Next pending child of the top frame, if any.
        let child: Option<&Value> = {
            let top = stack.last_mut().expect("stack is non-empty");
            match top {
                Frame::Obj { entries, next, .. } => {
                    if *next < entries.len() {
                        let v = entries[*next].1;
                        *next += 1;
                        Some(v)
                    } else {
                        None
                    }
                }
                Frame::Arr { items, next, .. } => {
                    if *next < items.len() {
                        // Copy the slice reference out so the child borrows
                        // the input, not this stack frame.
                        let items: &[Value] = *items;
                        let v = &items[*next];
                        *next += 1;
                        Some(v)
                    } else {
                        None
                    }
                }
            }
        };

        match child {
            Some(v) if is_leaf(v) => {
                let leaf = Node::new_leaf(v.clone(), mint());
                attach(stack.last_mut().unwrap(), leaf, mint);
            }
            Some(v) => {
                if stack.len() >= MAX_TRAVERSAL_DEPTH {
                    return Err(DocError::DepthExceeded {
                        path: String::from(""),
                    });
                }
                stack.push(Frame::for_value(v));
            }
            None => {
                let done = finish(stack.pop().unwrap());
                match stack.last_mut() {
                    Some(parent) => attach(parent, done, mint),
                    None => return Ok(done),
                }
            }
        }
    }
}
