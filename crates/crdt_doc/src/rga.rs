//! Replicated Growable Array backing JSON arrays.
//!
//! Each element carries the id of the element it was inserted after (`prev`,
//! or the virtual `HEAD` origin) and its insertion dot. Concurrent inserts
//! after the same predecessor are ordered by insertion dot, greater dot
//! first, which makes the depth-first order deterministic on every replica.
//!
//! Deleted elements stay as tombstones so that concurrent inserts anchored
//! at them still find their place; the delete dot (`del_dot`) is what later
//! allows causally-safe compaction.

use crate::dot::{Anchor, Dot, ElemId};
use crate::error::{DocError, DocResult};
use crate::node::Node;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// One element of a sequence.
#[derive(Clone, Debug)]
pub struct SeqElem {
    /// Element id: the insertion dot rendered as `"actor:ctr"`.
    pub id: ElemId,
    /// The element this one was inserted after.
    pub prev: Anchor,
    /// Dot of the insert.
    pub ins_dot: Dot,
    /// True when the element has been deleted.
    pub tombstone: bool,
    /// Dot of the delete event. Present whenever `tombstone` is set, except
    /// for elements ingested from snapshots that predate delete dots; those
    /// are kept but never compacted.
    pub del_dot: Option<Dot>,
    /// The element's value.
    pub value: Node,
}

impl SeqElem {
    /// True when the element has been deleted.
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }
}

/// RGA sequence: elements keyed by id, with a cached linearization.
#[derive(Debug, Default)]
pub struct SeqNode {
    elems: BTreeMap<ElemId, SeqElem>,
    /// Depth-first order of live element ids. Rebuilt lazily, dropped by
    /// every mutation that can change membership or order.
    cache: RefCell<Option<Vec<ElemId>>>,
}

impl Clone for SeqNode {
    fn clone(&self) -> Self {
        Self {
            elems: self.elems.clone(),
            cache: RefCell::new(self.cache.borrow().clone()),
        }
    }
}

impl SeqNode {
    /// New empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored elements, tombstones included.
    pub fn stored_len(&self) -> usize {
        self.elems.len()
    }

    /// Number of live (visible) elements.
    pub fn live_len(&self) -> usize {
        self.elems.values().filter(|e| !e.tombstone).count()
    }

    /// True when no element is visible.
    pub fn is_empty(&self) -> bool {
        self.live_len() == 0
    }

    /// True when the sequence stores `id` (live or tombstoned).
    pub fn contains(&self, id: &ElemId) -> bool {
        self.elems.contains_key(id)
    }

    /// Look up an element by id.
    pub fn get(&self, id: &ElemId) -> Option<&SeqElem> {
        self.elems.get(id)
    }

    /// Mutably borrow an element's value. Does not disturb the cached order:
    /// editing a value cannot change membership or ordering.
    pub fn value_mut(&mut self, id: &ElemId) -> Option<&mut Node> {
        self.elems.get_mut(id).map(|e| &mut e.value)
    }

    /// Iterate stored elements in id order.
    pub fn elems(&self) -> impl Iterator<Item = &SeqElem> {
        self.elems.values()
    }

    /// Insert a value after `prev`.
    ///
    /// Idempotent: if `id` is already stored the call is a no-op and returns
    /// `Ok(false)`. A concrete `prev` that is not stored (not even as a
    /// tombstone) is a structural error.
    pub fn insert_after(
        &mut self,
        prev: Anchor,
        id: ElemId,
        ins_dot: Dot,
        value: Node,
    ) -> DocResult<bool> {
        if self.elems.contains_key(&id) {
            return Ok(false);
        }
        if let Anchor::Elem(p) = &prev {
            if !self.elems.contains_key(p) {
                return Err(DocError::MissingPredecessor {
                    prev: p.to_string(),
                });
            }
        }
        debug_assert_eq!(id, ins_dot.elem_id());
        self.elems.insert(
            id.clone(),
            SeqElem {
                id,
                prev,
                ins_dot,
                tombstone: false,
                del_dot: None,
                value,
            },
        );
        self.cache.borrow_mut().take();
        Ok(true)
    }

    /// Delete `id`, keeping the earliest delete dot under concurrent
    /// deletes. Missing elements are ignored; returns whether the element
    /// was found.
    pub fn delete(&mut self, id: &ElemId, del_dot: Dot) -> bool {
        let Some(elem) = self.elems.get_mut(id) else {
            return false;
        };
        let was_live = !elem.tombstone;
        elem.tombstone = true;
        match &elem.del_dot {
            Some(existing) if *existing <= del_dot => {}
            _ => elem.del_dot = Some(del_dot),
        }
        if was_live {
            self.cache.borrow_mut().take();
        }
        true
    }

    /// Depth-first order of live element ids.
    ///
    /// Children of a shared predecessor appear greater-dot-first. Tombstoned
    /// elements are skipped in the returned order but their subtrees are
    /// still walked, so elements anchored at a deleted predecessor surface
    /// in its place. The result is a defensive copy of the cached order.
    pub fn linearize_ids(&self) -> Vec<ElemId> {
        if let Some(ids) = self.cache.borrow().as_ref() {
            return ids.clone();
        }
        let ids = self.compute_linearization();
        *self.cache.borrow_mut() = Some(ids.clone());
        ids
    }

    fn compute_linearization(&self) -> Vec<ElemId> {
        // Group children per anchor. Iterating `elems` in ascending id order
        // yields each child list ascending; pushing a list onto the stack
        // as-is therefore pops greater ids first.
        let mut children: BTreeMap<&Anchor, Vec<&ElemId>> = BTreeMap::new();
        for elem in self.elems.values() {
            children.entry(&elem.prev).or_default().push(&elem.id);
        }

        let mut out = Vec::with_capacity(self.elems.len());
        let mut stack: Vec<&ElemId> = Vec::new();
        let head = Anchor::Head;
        if let Some(kids) = children.get(&head) {
            stack.extend(kids.iter().copied());
        }
        while let Some(id) = stack.pop() {
            let elem = &self.elems[id];
            if !elem.tombstone {
                out.push(id.clone());
            }
            if let Some(kids) = children.get(&Anchor::Elem(id.clone())) {
                stack.extend(kids.iter().copied());
            }
        }
        out
    }

    /// Live element id at `index` in linearized order.
    pub fn id_at_live_index(&self, index: usize) -> Option<ElemId> {
        self.linearize_ids().get(index).cloned()
    }

    /// Id of the last live element, if any.
    pub fn last_live(&self) -> Option<ElemId> {
        self.linearize_ids().last().cloned()
    }

    /// The anchor a new element must be inserted after so that it lands at
    /// `index` in the visible order. `None` is the append sentinel.
    ///
    /// Index 0 anchors at the origin; an index at or past the live length
    /// anchors at the last live element; anything else anchors at the
    /// element currently at `index - 1`.
    pub fn prev_for_insert_at(&self, index: Option<usize>) -> Anchor {
        let ids = self.linearize_ids();
        let index = index.unwrap_or(ids.len());
        if index == 0 {
            Anchor::Head
        } else if index >= ids.len() {
            ids.last().cloned().map(Anchor::Elem).unwrap_or(Anchor::Head)
        } else {
            Anchor::Elem(ids[index - 1].clone())
        }
    }

    /// Highest insertion counter among elements sharing `anchor` as their
    /// predecessor. Used to fast-forward the local clock above skewed
    /// sibling dots before minting an insert dot.
    pub fn max_sibling_ctr(&self, anchor: &Anchor) -> Option<u64> {
        self.elems
            .values()
            .filter(|e| &e.prev == anchor)
            .map(|e| e.ins_dot.ctr)
            .max()
    }

    /// Insert a fully-formed element (merge/deserialize construction).
    pub(crate) fn insert_elem(&mut self, elem: SeqElem) {
        self.elems.insert(elem.id.clone(), elem);
        self.cache.borrow_mut().take();
    }

    /// Decompose into the stored elements (compaction).
    pub(crate) fn into_elems(self) -> BTreeMap<ElemId, SeqElem> {
        self.elems
    }
}
