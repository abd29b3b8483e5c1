//! Intent applier: executes compiled intents against the replicated head.
//!
//! Array positions inside intents are indices into the base snapshot; the
//! applier maps them to element ids through a per-sequence index cache that
//! is seeded from the base linearization and, under sequential semantics,
//! updated as the same apply session mutates the sequence. Every minted dot
//! is absorbed into the clock (and the caller's version vector, when one is
//! supplied) before the next one is produced.

use crate::compile::Semantics;
use crate::error::{PatchError, PatchErrorKind};
use crate::intent::{CompiledIntent, InsertPos, Intent, SetMode};
use crdt_doc::{
    json_to_node, materialize_node, Anchor, Clock, Doc, Dot, ElemId, Node, SeqNode,
    VersionVector, ROOT_KEY,
};
use patch_model::{escape, ArrayToken, Pointer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Which document `test` intents are evaluated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TestAgainst {
    /// The mutating head document (default).
    #[default]
    Head,
    /// The base snapshot.
    Base,
}

/// Applier configuration, carried over from the apply options.
#[derive(Clone, Copy, Debug)]
pub struct ApplyConfig {
    /// Source for `test` evaluation.
    pub test_against: TestAgainst,
    /// Refuse to auto-create sequences at index 0 / append.
    pub strict_parents: bool,
    /// Resolution semantics the intents were compiled under; sequential
    /// sessions keep the index caches in step with their own mutations.
    pub semantics: Semantics,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            test_against: TestAgainst::Head,
            strict_parents: false,
            semantics: Semantics::Sequential,
        }
    }
}

/// Attempt budget for escaping insert-dot collisions under counter skew.
const DOT_ATTEMPT_BUDGET: usize = 1024;

/// Apply compiled intents to `head`, minting dots from `clock`.
///
/// `base` is the snapshot the intents' indices refer to. When `vv` is
/// supplied every minted dot is recorded in it as well. The head is mutated
/// in place; atomicity is the caller's concern.
pub fn apply_intents(
    head: &mut Doc,
    base: &Doc,
    intents: &[CompiledIntent],
    clock: &mut Clock,
    mut vv: Option<&mut VersionVector>,
    cfg: &ApplyConfig,
) -> Result<(), PatchError> {
    let mut session = Session {
        base,
        caches: BTreeMap::new(),
        sequential: cfg.semantics == Semantics::Sequential,
    };
    for compiled in intents {
        let mut minter = Minter {
            clock: &mut *clock,
            vv: vv.as_deref_mut(),
        };
        tracing::trace!(op_index = compiled.op_index, intent = ?compiled.intent, "applying intent");
        apply_one(head, &mut session, &mut minter, cfg, compiled)?;
    }
    Ok(())
}

struct Minter<'m> {
    clock: &'m mut Clock,
    vv: Option<&'m mut VersionVector>,
}

impl Minter<'_> {
    fn mint(&mut self) -> Dot {
        let dot = self.clock.next();
        if let Some(vv) = self.vv.as_deref_mut() {
            vv.observe_dot(&dot);
        }
        dot
    }

    fn fast_forward(&mut self, ctr: u64) {
        self.clock.fast_forward(ctr);
    }
}

struct Session<'s> {
    base: &'s Doc,
    /// Per-sequence index→id mapping, keyed by the sequence's slot path.
    caches: BTreeMap<String, Vec<ElemId>>,
    sequential: bool,
}

impl Session<'_> {
    /// Seed (or fetch) the index mapping for a sequence. The mapping comes
    /// from the base snapshot when the path resolves there; sequences the
    /// session itself created fall back to the head linearization.
    fn ids_for(&mut self, tokens: &[String], head_seq: &SeqNode) -> &mut Vec<ElemId> {
        let key = slot_string(tokens);
        self.caches.entry(key).or_insert_with(|| {
            match resolve_base_node(self.base, tokens) {
                Some(Node::Seq(s)) => s.linearize_ids(),
                _ => head_seq.linearize_ids(),
            }
        })
    }

    /// Drop cached mappings for everything strictly below `tokens`: the
    /// subtree was overwritten or its element indices shifted.
    fn invalidate_below(&mut self, tokens: &[String]) {
        let prefix = format!("{}/", slot_string(tokens));
        self.caches.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Drop the cached mapping at `tokens` itself and everything below.
    fn invalidate_at(&mut self, tokens: &[String]) {
        let key = slot_string(tokens);
        self.caches.remove(&key);
        self.invalidate_below(tokens);
    }
}

/// Render slot-space tokens as a cache key.
fn slot_string(tokens: &[String]) -> String {
    let mut out = String::new();
    for token in tokens {
        out.push('/');
        out.push_str(&escape(token));
    }
    out
}

/// Render slot-space tokens as a user-facing pointer (the virtual root
/// token is stripped).
fn user_path(tokens: &[String]) -> String {
    Pointer::from_tokens(tokens.iter().skip(1).cloned().collect()).to_string()
}

fn apply_one(
    head: &mut Doc,
    session: &mut Session<'_>,
    minter: &mut Minter<'_>,
    cfg: &ApplyConfig,
    compiled: &CompiledIntent,
) -> Result<(), PatchError> {
    let idx = compiled.op_index;
    match &compiled.intent {
        Intent::ObjSet {
            parent,
            key,
            value,
            mode,
        } => obj_set(head, session, minter, parent, key, value, *mode, idx),
        Intent::ObjRemove { parent, key } => obj_remove(head, session, minter, parent, key, idx),
        Intent::ArrInsert {
            parent,
            index,
            value,
        } => arr_insert(head, session, minter, cfg, parent, *index, value, idx),
        Intent::ArrDelete { parent, index } => {
            arr_delete(head, session, minter, parent, *index, idx)
        }
        Intent::ArrReplace {
            parent,
            index,
            value,
        } => arr_replace(head, session, minter, parent, *index, value, idx),
        Intent::Test { path, value } => test(head, session, cfg, path, value, idx),
    }
}

#[allow(clippy::too_many_arguments)]
fn obj_set(
    head: &mut Doc,
    session: &mut Session<'_>,
    minter: &mut Minter<'_>,
    parent: &Pointer,
    key: &str,
    value: &Value,
    mode: Option<SetMode>,
    idx: usize,
) -> Result<(), PatchError> {
    let tokens = parent.tokens();

    // Resolve the target map: the hidden root map for root-level writes,
    // otherwise a map node inside the head.
    let map = if tokens.is_empty() {
        head.root_mut()
    } else {
        let node = resolve_head_mut(head, tokens, session, minter, idx, true)?;
        node.as_map_mut().ok_or_else(|| {
            PatchError::new(
                PatchErrorKind::InvalidTarget,
                user_path(tokens),
                idx,
                "target parent is not an object",
            )
        })?
    };

    if mode == Some(SetMode::Replace) && map.get(key).is_none() {
        return Err(PatchError::new(
            PatchErrorKind::MissingTarget,
            format!("{}/{}", user_path(tokens), escape(key)),
            idx,
            "no such key to replace",
        ));
    }

    // Stay above whatever dot currently governs this key, so the fresh
    // write wins both locally and under merge.
    let floor = map
        .get(key)
        .map(|e| e.dot.ctr)
        .into_iter()
        .chain(map.tombstone(key).map(|d| d.ctr))
        .max();
    if let Some(floor) = floor {
        minter.fast_forward(floor);
    }

    let node = build_node(value, minter, idx)?;
    let dot = minter.mint();
    map.set(key.to_string(), node, dot);

    // The subtree under this key was replaced wholesale.
    let mut slot_tokens = tokens.to_vec();
    slot_tokens.push(key.to_string());
    session.invalidate_at(&slot_tokens);
    Ok(())
}

fn obj_remove(
    head: &mut Doc,
    session: &mut Session<'_>,
    minter: &mut Minter<'_>,
    parent: &Pointer,
    key: &str,
    idx: usize,
) -> Result<(), PatchError> {
    let tokens = parent.tokens();
    let map = if tokens.is_empty() {
        head.root_mut()
    } else {
        let node = resolve_head_mut(head, tokens, session, minter, idx, false)?;
        node.as_map_mut().ok_or_else(|| {
            PatchError::new(
                PatchErrorKind::InvalidTarget,
                user_path(tokens),
                idx,
                "target parent is not an object",
            )
        })?
    };

    let Some(entry) = map.get(key) else {
        return Err(PatchError::new(
            PatchErrorKind::MissingTarget,
            format!("{}/{}", user_path(tokens), escape(key)),
            idx,
            "no such key to remove",
        ));
    };
    let floor = entry.dot.ctr;
    minter.fast_forward(floor);
    let dot = minter.mint();
    map.remove(key, dot);

    let mut slot_tokens = tokens.to_vec();
    slot_tokens.push(key.to_string());
    session.invalidate_at(&slot_tokens);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn arr_insert(
    head: &mut Doc,
    session: &mut Session<'_>,
    minter: &mut Minter<'_>,
    cfg: &ApplyConfig,
    parent: &Pointer,
    index: InsertPos,
    value: &Value,
    idx: usize,
) -> Result<(), PatchError> {
    let tokens = parent.tokens();

    ensure_seq_exists(head, session, minter, cfg, tokens, index, idx)?;

    // Phase 1: map the index to an anchor against the base snapshot.
    let anchor = {
        let node = resolve_head_mut(head, tokens, session, minter, idx, true)?;
        let seq = node.as_seq().ok_or_else(|| {
            PatchError::new(
                PatchErrorKind::InvalidTarget,
                user_path(tokens),
                idx,
                "target parent is not an array",
            )
        })?;
        let ids = session.ids_for(tokens, seq);
        match index {
            InsertPos::At(0) => Anchor::Head,
            InsertPos::At(i) if i <= ids.len() && i > 0 => Anchor::Elem(ids[i - 1].clone()),
            // Past the end (or an explicit append): anchor at the last
            // live element.
            _ => ids.last().cloned().map(Anchor::Elem).unwrap_or(Anchor::Head),
        }
    };

    // Phase 2: anchor into the head and insert.
    let node = resolve_head_mut(head, tokens, session, minter, idx, true)?;
    let seq = node.as_seq_mut().expect("checked in phase 1");
    if let Anchor::Elem(p) = &anchor {
        // The anchor must exist in the head, tombstoned anchors included.
        if !seq.contains(p) {
            return Err(PatchError::new(
                PatchErrorKind::MissingParent,
                user_path(tokens),
                idx,
                format!("predecessor {p} is not present in the head sequence"),
            ));
        }
    }

    if let Some(ctr) = seq.max_sibling_ctr(&anchor) {
        minter.fast_forward(ctr);
    }
    let ins_dot = mint_insert_dot(seq, minter, tokens, idx)?;
    let elem_id = ins_dot.elem_id();
    let value_node = build_node(value, minter, idx)?;
    seq.insert_after(anchor, elem_id.clone(), ins_dot, value_node)
        .map_err(|e| at_op(e.into(), idx))?;

    if session.sequential {
        let key = slot_string(tokens);
        if let Some(ids) = session.caches.get_mut(&key) {
            match index {
                InsertPos::At(i) => {
                    let at = i.min(ids.len());
                    ids.insert(at, elem_id);
                }
                InsertPos::End => ids.push(elem_id),
            }
        }
    }
    session.invalidate_below(tokens);
    Ok(())
}

fn arr_delete(
    head: &mut Doc,
    session: &mut Session<'_>,
    minter: &mut Minter<'_>,
    parent: &Pointer,
    index: usize,
    idx: usize,
) -> Result<(), PatchError> {
    let tokens = parent.tokens();
    let elem_path = format!("{}/{}", user_path(tokens), index);

    let target = {
        let node = resolve_head_node(head, tokens, session, idx, PatchErrorKind::MissingTarget)?;
        let seq = node.as_seq().ok_or_else(|| {
            PatchError::new(
                PatchErrorKind::InvalidTarget,
                user_path(tokens),
                idx,
                "target parent is not an array",
            )
        })?;
        let ids = session.ids_for(tokens, seq);
        ids.get(index).cloned().ok_or_else(|| {
            PatchError::new(
                PatchErrorKind::OutOfBounds,
                elem_path.clone(),
                idx,
                "no base element at this index",
            )
        })?
    };

    let node = resolve_head_mut(head, tokens, session, minter, idx, false)?;
    let seq = node.as_seq_mut().expect("checked above");
    if !seq.contains(&target) {
        return Err(PatchError::new(
            PatchErrorKind::MissingTarget,
            elem_path,
            idx,
            "element is not present in the head sequence",
        ));
    }
    let del_dot = minter.mint();
    seq.delete(&target, del_dot);

    if session.sequential {
        let key = slot_string(tokens);
        if let Some(ids) = session.caches.get_mut(&key) {
            if index < ids.len() {
                ids.remove(index);
            }
        }
    }
    session.invalidate_below(tokens);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn arr_replace(
    head: &mut Doc,
    session: &mut Session<'_>,
    minter: &mut Minter<'_>,
    parent: &Pointer,
    index: usize,
    value: &Value,
    idx: usize,
) -> Result<(), PatchError> {
    let tokens = parent.tokens();
    let elem_path = format!("{}/{}", user_path(tokens), index);

    let target = {
        let node = resolve_head_node(head, tokens, session, idx, PatchErrorKind::MissingTarget)?;
        let seq = node.as_seq().ok_or_else(|| {
            PatchError::new(
                PatchErrorKind::InvalidTarget,
                user_path(tokens),
                idx,
                "target parent is not an array",
            )
        })?;
        let ids = session.ids_for(tokens, seq);
        ids.get(index).cloned().ok_or_else(|| {
            PatchError::new(
                PatchErrorKind::OutOfBounds,
                elem_path.clone(),
                idx,
                "no base element at this index",
            )
        })?
    };

    let node = resolve_head_mut(head, tokens, session, minter, idx, false)?;
    let seq = node.as_seq_mut().expect("checked above");
    match seq.get(&target) {
        Some(elem) if !elem.is_tombstone() => {}
        // Concurrently deleted or never delivered: nothing to replace.
        _ => {
            return Err(PatchError::new(
                PatchErrorKind::MissingTarget,
                elem_path,
                idx,
                "base element is no longer live in the head sequence",
            ))
        }
    }

    let del_dot = minter.mint();
    seq.delete(&target, del_dot);

    // The replacement anchors at the replaced element, surfacing exactly
    // where it was.
    let anchor = Anchor::Elem(target.clone());
    if let Some(ctr) = seq.max_sibling_ctr(&anchor) {
        minter.fast_forward(ctr);
    }
    let ins_dot = mint_insert_dot(seq, minter, tokens, idx)?;
    let elem_id = ins_dot.elem_id();
    let value_node = build_node(value, minter, idx)?;
    seq.insert_after(anchor, elem_id.clone(), ins_dot, value_node)
        .map_err(|e| at_op(e.into(), idx))?;

    if session.sequential {
        let key = slot_string(tokens);
        if let Some(ids) = session.caches.get_mut(&key) {
            if index < ids.len() {
                ids[index] = elem_id;
            }
        }
    }
    session.invalidate_below(tokens);
    Ok(())
}

fn test(
    head: &Doc,
    session: &mut Session<'_>,
    cfg: &ApplyConfig,
    path: &Pointer,
    expected: &Value,
    idx: usize,
) -> Result<(), PatchError> {
    let tokens = path.tokens();
    let failed = || {
        PatchError::new(
            PatchErrorKind::TestFailed,
            user_path(tokens),
            idx,
            "test did not match",
        )
    };

    let is_root = tokens.len() == 1;
    let actual: Value = match cfg.test_against {
        TestAgainst::Head => {
            match resolve_head_node(head, tokens, session, idx, PatchErrorKind::MissingTarget) {
                Ok(node) => materialize_node(node).map_err(|e| at_op(e.into(), idx))?,
                // An empty root slot reads as null; anything else missing
                // fails the assertion.
                Err(_) if is_root => Value::Null,
                Err(e) if e.kind == PatchErrorKind::InvalidPointer => return Err(e),
                Err(_) => return Err(failed()),
            }
        }
        TestAgainst::Base => match resolve_base_node(session.base, tokens) {
            Some(node) => materialize_node(node).map_err(|e| at_op(e.into(), idx))?,
            None if is_root => Value::Null,
            None => return Err(failed()),
        },
    };

    if &actual != expected {
        return Err(failed());
    }
    Ok(())
}

/// Build a CRDT node for a patch value, minting one dot per written node.
fn build_node(value: &Value, minter: &mut Minter<'_>, idx: usize) -> Result<Node, PatchError> {
    json_to_node(value, &mut || minter.mint()).map_err(|e| at_op(e.into(), idx))
}

fn at_op(mut err: PatchError, idx: usize) -> PatchError {
    err.op_index.get_or_insert(idx);
    err
}

/// Mint an insert dot that does not collide with any stored element id.
fn mint_insert_dot(
    seq: &SeqNode,
    minter: &mut Minter<'_>,
    tokens: &[String],
    idx: usize,
) -> Result<Dot, PatchError> {
    let mut dot = minter.mint();
    let mut attempts = 1;
    while seq.contains(&dot.elem_id()) {
        if attempts >= DOT_ATTEMPT_BUDGET {
            return Err(PatchError::new(
                PatchErrorKind::DotGenerationExhausted,
                user_path(tokens),
                idx,
                "could not mint a fresh insert dot within the attempt budget",
            ));
        }
        dot = minter.mint();
        attempts += 1;
    }
    Ok(dot)
}

/// Auto-create a sequence slot that is absent in both head and base, when
/// the insert targets position 0 or the end and strict parents are off.
fn ensure_seq_exists(
    head: &mut Doc,
    session: &mut Session<'_>,
    minter: &mut Minter<'_>,
    cfg: &ApplyConfig,
    tokens: &[String],
    index: InsertPos,
    idx: usize,
) -> Result<(), PatchError> {
    match resolve_head_node(head, tokens, session, idx, PatchErrorKind::MissingParent) {
        Ok(_) => return Ok(()),
        // Only a genuinely missing slot is creatable; a primitive in the
        // way or a bad token stays an error.
        Err(e) if e.kind == PatchErrorKind::MissingParent => {}
        Err(e) => return Err(e),
    }
    let absent_in_base = resolve_base_node(session.base, tokens).is_none();
    let creatable_index = matches!(index, InsertPos::At(0) | InsertPos::End);
    if cfg.strict_parents || !absent_in_base || !creatable_index {
        return Err(PatchError::new(
            PatchErrorKind::MissingParent,
            user_path(tokens),
            idx,
            "array parent does not exist",
        ));
    }

    let (parent_tokens, last) = tokens
        .split_last()
        .map(|(last, parent)| (parent, last))
        .expect("slot paths are never empty");
    let map = if parent_tokens.is_empty() {
        head.root_mut()
    } else {
        let node = resolve_head_mut(head, parent_tokens, session, minter, idx, true)?;
        node.as_map_mut().ok_or_else(|| {
            PatchError::new(
                PatchErrorKind::MissingParent,
                user_path(parent_tokens),
                idx,
                "container for the new array is not an object",
            )
        })?
    };
    let floor = map
        .get(last)
        .map(|e| e.dot.ctr)
        .into_iter()
        .chain(map.tombstone(last).map(|d| d.ctr))
        .max();
    if let Some(floor) = floor {
        minter.fast_forward(floor);
    }
    let dot = minter.mint();
    map.set(last.clone(), Node::new_seq(), dot);
    Ok(())
}

/// Plain traversal of the base snapshot: index tokens are positions in the
/// base's own linearization. `None` on any failure.
fn resolve_base_node<'b>(base: &'b Doc, tokens: &[String]) -> Option<&'b Node> {
    let first = tokens.first()?;
    let mut current: &'b Node = &base.root().get(first)?.node;
    for token in &tokens[1..] {
        current = match current {
            Node::Map(map) => &map.get(token)?.node,
            Node::Seq(seq) => {
                let i = match ArrayToken::parse(token) {
                    Some(ArrayToken::Index(i)) => i,
                    _ => return None,
                };
                let id = seq.id_at_live_index(i)?;
                let elem = seq.get(&id)?;
                if elem.is_tombstone() {
                    return None;
                }
                &elem.value
            }
            Node::Leaf(_) => return None,
        };
    }
    Some(current)
}

/// Immutable head resolution with the fixed lookup-error mapping.
fn resolve_head_node<'h>(
    head: &'h Doc,
    tokens: &[String],
    session: &mut Session<'_>,
    idx: usize,
    final_missing: PatchErrorKind,
) -> Result<&'h Node, PatchError> {
    let first = tokens.first().expect("slot paths are never empty");
    debug_assert_eq!(first, ROOT_KEY);
    let Some(entry) = head.root().get(first) else {
        return Err(PatchError::new(
            if tokens.len() == 1 {
                final_missing
            } else {
                PatchErrorKind::MissingParent
            },
            user_path(tokens),
            idx,
            "document root is empty",
        ));
    };
    let mut current: &Node = &entry.node;
    for (pos, token) in tokens.iter().enumerate().skip(1) {
        let at_target = pos + 1 == tokens.len();
        let missing = if at_target {
            final_missing
        } else {
            PatchErrorKind::MissingParent
        };
        let here = || user_path(&tokens[..=pos]);
        current = match current {
            Node::Map(map) => {
                &map.get(token)
                    .ok_or_else(|| PatchError::new(missing, here(), idx, "no such key"))?
                    .node
            }
            Node::Seq(seq) => {
                let i = match ArrayToken::parse(token) {
                    Some(ArrayToken::Index(i)) => i,
                    _ => {
                        return Err(PatchError::new(
                            PatchErrorKind::InvalidPointer,
                            here(),
                            idx,
                            "not a valid array index token",
                        ))
                    }
                };
                let id = session
                    .ids_for(&tokens[..pos], seq)
                    .get(i)
                    .cloned()
                    .ok_or_else(|| {
                        PatchError::new(missing, here(), idx, "no element at this index")
                    })?;
                match seq.get(&id) {
                    Some(elem) if !elem.is_tombstone() => &elem.value,
                    _ => {
                        return Err(PatchError::new(
                            missing,
                            here(),
                            idx,
                            "element is not live in the head sequence",
                        ))
                    }
                }
            }
            Node::Leaf(_) => {
                return Err(PatchError::new(
                    PatchErrorKind::InvalidTarget,
                    here(),
                    idx,
                    "cannot traverse into a primitive value",
                ))
            }
        };
    }
    Ok(current)
}

/// Mutable head resolution; optionally creates the (empty) root slot.
fn resolve_head_mut<'h>(
    head: &'h mut Doc,
    tokens: &[String],
    session: &mut Session<'_>,
    minter: &mut Minter<'_>,
    idx: usize,
    create_root: bool,
) -> Result<&'h mut Node, PatchError> {
    let first = tokens.first().expect("slot paths are never empty");
    debug_assert_eq!(first, ROOT_KEY);
    if head.root().get(first).is_none() {
        if create_root {
            // Intermediate containers are only ever created at the root
            // slot; deeper missing parents are errors.
            let dot = minter.mint();
            head.root_mut().set(first.clone(), Node::new_map(), dot);
        } else {
            return Err(PatchError::new(
                PatchErrorKind::MissingParent,
                user_path(tokens),
                idx,
                "document root is empty",
            ));
        }
    }

    let mut current: &mut Node = &mut head
        .root_mut()
        .get_mut(first)
        .expect("just checked or created")
        .node;
    for (pos, token) in tokens.iter().enumerate().skip(1) {
        let missing = PatchErrorKind::MissingParent;
        let here = user_path(&tokens[..=pos]);
        let node = current;
        current = match node {
            Node::Map(map) => {
                &mut map
                    .get_mut(token)
                    .ok_or_else(|| PatchError::new(missing, here.clone(), idx, "no such key"))?
                    .node
            }
            Node::Seq(seq) => {
                let i = match ArrayToken::parse(token) {
                    Some(ArrayToken::Index(i)) => i,
                    _ => {
                        return Err(PatchError::new(
                            PatchErrorKind::InvalidPointer,
                            here,
                            idx,
                            "not a valid array index token",
                        ))
                    }
                };
                let id = session
                    .ids_for(&tokens[..pos], &*seq)
                    .get(i)
                    .cloned()
                    .ok_or_else(|| {
                        PatchError::new(missing, here.clone(), idx, "no element at this index")
                    })?;
                match seq.get(&id) {
                    Some(elem) if !elem.is_tombstone() => {}
                    _ => {
                        return Err(PatchError::new(
                            missing,
                            here,
                            idx,
                            "element is not live in the head sequence",
                        ))
                    }
                }
                seq.value_mut(&id).expect("presence checked above")
            }
            Node::Leaf(_) => {
                return Err(PatchError::new(
                    PatchErrorKind::InvalidTarget,
                    here,
                    idx,
                    "cannot traverse into a primitive value",
                ))
            }
        };
    }
    Ok(current)
}
