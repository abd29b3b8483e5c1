//! The replicated-state façade.
//!
//! A [`State`] owns one replica: a document plus the clock of its actor.
//! Patches go in as RFC 6902, get compiled against a base snapshot and
//! applied with freshly minted dots; whole states merge commutatively and
//! serialize to a canonical, strictly-validated wire form.
//!
//! Immutable application ([`State::apply_patch`]) clones first and never
//! touches the receiver on failure. In-place application is atomic by
//! default (snapshot and restore on failure); non-atomic mode trades that
//! for not paying the snapshot and may leave partial effects behind.

use crate::apply::{apply_intents, ApplyConfig, TestAgainst};
use crate::compile::{compile_patch, validate_json, CompileOptions, JsonValidation, Semantics};
use crate::error::{EngineError, PatchError};
use crdt_doc::{
    compact_doc, compact_doc_in_place, doc_from_wire, doc_to_wire, materialize_doc, merge_doc,
    ActorId, Clock, CompactStats, Doc, DocError, MergeError, MergeOptions, VersionVector,
    WireDoc, WireError, WireReason,
};
use patch_model::{diff, DiffOptions, PatchOp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options for creating a state.
#[derive(Clone, Debug, Default)]
pub struct StateOptions {
    /// Starting counter for the actor's clock.
    pub start: u64,
    /// Validation applied to the initial JSON value.
    pub json_validation: JsonValidation,
}

/// Options for forking a state.
#[derive(Clone, Debug, Default)]
pub struct ForkOptions {
    /// Permit forking under the origin's own actor id.
    pub allow_actor_reuse: bool,
}

/// Options for patch application.
#[derive(Clone, Debug)]
pub struct ApplyOptions<'a> {
    /// The base snapshot patch indices refer to; defaults to the receiving
    /// state's own document.
    pub base: Option<&'a Doc>,
    /// Sequential (each op sees its predecessors) or fixed-base semantics.
    pub semantics: Semantics,
    /// Which document `test` ops are checked against.
    pub test_against: TestAgainst,
    /// Refuse auto-creation of absent array parents.
    pub strict_parents: bool,
    /// Validation applied to values carried by the patch.
    pub json_validation: JsonValidation,
}

impl Default for ApplyOptions<'_> {
    fn default() -> Self {
        Self {
            base: None,
            semantics: Semantics::Sequential,
            test_against: TestAgainst::Head,
            strict_parents: false,
            json_validation: JsonValidation::None,
        }
    }
}

/// Options for in-place patch application.
#[derive(Clone, Debug)]
pub struct InPlaceOptions<'a> {
    /// The shared apply options.
    pub apply: ApplyOptions<'a>,
    /// Snapshot the state and restore it on failure (default).
    pub atomic: bool,
}

impl Default for InPlaceOptions<'_> {
    fn default() -> Self {
        Self {
            apply: ApplyOptions::default(),
            atomic: true,
        }
    }
}

/// Options for merging two states.
#[derive(Clone, Debug, Default)]
pub struct StateMergeOptions {
    /// Actor of the merged state's clock; defaults to the receiver's.
    pub actor: Option<ActorId>,
    /// Reject merging sequences with no shared element (default on).
    pub require_shared_origin: bool,
}

impl StateMergeOptions {
    /// The defaults: receiver's actor, shared origin required.
    pub fn new() -> Self {
        Self {
            actor: None,
            require_shared_origin: true,
        }
    }
}

/// One replica: a replicated document and its actor's clock.
#[derive(Clone, Debug)]
pub struct State {
    doc: Doc,
    clock: Clock,
}

impl State {
    /// Create a state holding `initial`, written by `actor`.
    pub fn new(initial: &Value, actor: &str, opts: &StateOptions) -> Result<State, EngineError> {
        validate_json(initial, opts.json_validation).map_err(EngineError::Patch)?;
        let mut clock = Clock::parse(actor, opts.start)?;
        let doc = Doc::from_json(initial, &mut || clock.next())?;
        tracing::debug!(actor, ctr = clock.ctr(), "created state");
        Ok(State { doc, clock })
    }

    /// Fork this replica for a new actor.
    ///
    /// Reusing the origin's actor is rejected unless explicitly allowed;
    /// the forked clock continues from the origin's counter either way, so
    /// a permitted reuse cannot re-mint dots the origin already issued.
    pub fn fork(&self, actor: &str, opts: &ForkOptions) -> Result<State, EngineError> {
        let actor = ActorId::new(actor)?;
        if &actor == self.clock.actor() && !opts.allow_actor_reuse {
            return Err(EngineError::ActorReuse {
                actor: actor.to_string(),
            });
        }
        Ok(State {
            doc: self.doc.clone(),
            clock: Clock::new(actor, self.clock.ctr()),
        })
    }

    /// The actor this state writes as.
    pub fn actor(&self) -> &ActorId {
        self.clock.actor()
    }

    /// The state's clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The underlying document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Render the current document as JSON.
    pub fn to_json(&self) -> Result<Value, DocError> {
        materialize_doc(&self.doc)
    }

    /// Every dot this state has observed, as a version vector. The result
    /// covers the whole document plus this actor's clock.
    pub fn version_vector(&self) -> VersionVector {
        let mut vv = VersionVector::new();
        self.doc.for_each_dot(|d| vv.observe_dot(d));
        vv.set_max(self.clock.actor().clone(), self.clock.ctr());
        vv
    }

    /// Apply a patch immutably: the receiver is untouched, the result is a
    /// fresh state. No failure ever affects the input.
    pub fn apply_patch(
        &self,
        patch: &[PatchOp],
        opts: &ApplyOptions<'_>,
    ) -> Result<State, PatchError> {
        let mut next = self.clone();
        let base = opts.base.unwrap_or(&self.doc);
        apply_into(&mut next.doc, &mut next.clock, base, patch, opts)?;
        Ok(next)
    }

    /// Apply a patch in place.
    ///
    /// Atomic mode snapshots the document and clock and restores both on
    /// failure. Non-atomic mode applies best-effort and may leave the
    /// effects of the ops preceding the failure.
    pub fn apply_patch_in_place(
        &mut self,
        patch: &[PatchOp],
        opts: &InPlaceOptions<'_>,
    ) -> Result<(), PatchError> {
        if opts.atomic {
            let prior_doc = self.doc.clone();
            let prior_clock = self.clock.clone();
            let base = opts.apply.base.unwrap_or(&prior_doc);
            let result = apply_into(&mut self.doc, &mut self.clock, base, patch, &opts.apply);
            if let Err(e) = result {
                self.doc = prior_doc;
                self.clock = prior_clock;
                return Err(e);
            }
            Ok(())
        } else {
            let base_owned;
            let base = match opts.apply.base {
                Some(b) => b,
                None => {
                    base_owned = self.doc.clone();
                    &base_owned
                }
            };
            apply_into(&mut self.doc, &mut self.clock, base, patch, &opts.apply)
        }
    }

    /// Preflight a patch without mutating anything: the patch is applied by
    /// the literal RFC 6902 reference semantics to a rendered copy.
    pub fn validate_json_patch(&self, patch: &[PatchOp]) -> Result<(), PatchError> {
        let json = self.to_json().map_err(PatchError::from)?;
        patch_model::apply_patch_copy(&json, patch)
            .map(|_| ())
            .map_err(PatchError::from)
    }

    /// Merge with another replica into a fresh state.
    pub fn merge(&self, other: &State, opts: &StateMergeOptions) -> Result<State, MergeError> {
        let doc = merge_doc(
            &self.doc,
            &other.doc,
            &MergeOptions {
                require_shared_origin: opts.require_shared_origin,
            },
        )?;
        let actor = opts
            .actor
            .clone()
            .unwrap_or_else(|| self.clock.actor().clone());
        let mut clock = Clock::new(actor, self.clock.ctr().max(other.clock.ctr()));
        doc.for_each_dot(|d| clock.observe(d));
        Ok(State { doc, clock })
    }

    /// Prune causally stable tombstones into a fresh state.
    pub fn compact_tombstones(
        &self,
        stable: &VersionVector,
    ) -> Result<(State, CompactStats), DocError> {
        let (doc, stats) = compact_doc(&self.doc, stable)?;
        Ok((
            State {
                doc,
                clock: self.clock.clone(),
            },
            stats,
        ))
    }

    /// Prune causally stable tombstones in place.
    pub fn compact_tombstones_in_place(
        &mut self,
        stable: &VersionVector,
    ) -> Result<CompactStats, DocError> {
        compact_doc_in_place(&mut self.doc, stable)
    }

    /// Diff this state's JSON against another's, as an RFC 6902 patch.
    pub fn diff_json_patch(
        &self,
        other: &State,
        opts: &DiffOptions,
    ) -> Result<Vec<PatchOp>, DocError> {
        Ok(diff(&self.to_json()?, &other.to_json()?, opts))
    }

    /// Serialize to canonical JSON text.
    pub fn serialize(&self) -> Result<String, WireError> {
        let wire = StateWire {
            doc: doc_to_wire(&self.doc),
            clock: ClockWire {
                actor: self.clock.actor().as_str().to_string(),
                ctr: self.clock.ctr(),
            },
        };
        serde_json::to_string(&wire)
            .map_err(|e| wire_error(WireReason::InvalidShape, e.to_string()))
    }

    /// Parse and strictly validate a serialized state.
    ///
    /// The clock is raised to the highest counter observed for its actor in
    /// the document, so tampered or stale clock metadata cannot cause dot
    /// reuse.
    pub fn deserialize(text: &str) -> Result<State, WireError> {
        let wire: StateWire = serde_json::from_str(text)
            .map_err(|e| wire_error(WireReason::InvalidShape, e.to_string()))?;
        let doc = doc_from_wire(wire.doc)?;
        let actor = ActorId::new(wire.clock.actor)
            .map_err(|_| wire_error(WireReason::InvalidInvariant, "clock actor must be non-empty"))?;
        let observed = doc.max_ctr_for_actor(&actor);
        let clock = Clock::new(actor, wire.clock.ctr.max(observed));
        Ok(State { doc, clock })
    }
}

#[derive(Serialize, Deserialize)]
struct StateWire {
    doc: WireDoc,
    clock: ClockWire,
}

#[derive(Serialize, Deserialize)]
struct ClockWire {
    actor: String,
    ctr: u64,
}

fn wire_error(reason: WireReason, message: impl Into<String>) -> WireError {
    WireError {
        reason,
        path: String::new(),
        message: message.into(),
    }
}

/// Compile against the rendered base and apply onto the head.
fn apply_into(
    head: &mut Doc,
    clock: &mut Clock,
    base: &Doc,
    patch: &[PatchOp],
    opts: &ApplyOptions<'_>,
) -> Result<(), PatchError> {
    tracing::debug!(ops = patch.len(), semantics = ?opts.semantics, "applying patch");
    let base_json = materialize_doc(base).map_err(PatchError::from)?;
    let intents = compile_patch(
        &base_json,
        patch,
        &CompileOptions {
            semantics: opts.semantics,
            json_validation: opts.json_validation,
            strict_parents: opts.strict_parents,
        },
    )?;
    let cfg = ApplyConfig {
        test_against: opts.test_against,
        strict_parents: opts.strict_parents,
        semantics: opts.semantics,
    };
    apply_intents(head, base, &intents, clock, None, &cfg)
}

/// Actor-scoped application against a raw document and version vector.
///
/// Dots are minted for `actor` continuing from the vector's (and the
/// document's) highest observed counter; every minted dot is recorded in
/// the returned vector.
pub fn apply_patch_as_actor(
    doc: &Doc,
    vv: &VersionVector,
    actor: &str,
    patch: &[PatchOp],
    opts: &ApplyOptions<'_>,
) -> Result<(Doc, VersionVector), EngineError> {
    let actor = ActorId::new(actor)?;
    let mut head = doc.clone();
    let mut vv = vv.clone();
    let mut clock = Clock::new(actor.clone(), vv.get(&actor));
    {
        let clock = &mut clock;
        head.for_each_dot(|d| clock.observe(d));
    }

    let base = opts.base.unwrap_or(doc);
    let base_json = materialize_doc(base).map_err(PatchError::from)?;
    let intents = compile_patch(
        &base_json,
        patch,
        &CompileOptions {
            semantics: opts.semantics,
            json_validation: opts.json_validation,
            strict_parents: opts.strict_parents,
        },
    )?;
    let cfg = ApplyConfig {
        test_against: opts.test_against,
        strict_parents: opts.strict_parents,
        semantics: opts.semantics,
    };
    apply_intents(&mut head, base, &intents, &mut clock, Some(&mut vv), &cfg)?;
    vv.set_max(actor, clock.ctr());
    Ok((head, vv))
}

/// Emit the patch that turns `base`'s JSON into `head`'s.
pub fn crdt_to_json_patch(
    base: &Doc,
    head: &Doc,
    opts: &DiffOptions,
) -> Result<Vec<PatchOp>, DocError> {
    Ok(diff(
        &materialize_doc(base)?,
        &materialize_doc(head)?,
        opts,
    ))
}

/// Emit a single whole-document replace for `doc`'s JSON.
pub fn crdt_to_full_replace(doc: &Doc) -> Result<Vec<PatchOp>, DocError> {
    Ok(vec![PatchOp::Replace {
        path: String::new(),
        value: materialize_doc(doc)?,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PatchErrorKind;
    use serde_json::json;

    fn state(value: Value) -> State {
        State::new(&value, "local", &StateOptions::default()).unwrap()
    }

    fn parse(patch_text: &str) -> Vec<PatchOp> {
        serde_json::from_str(patch_text).unwrap()
    }

    #[test]
    fn test_create_and_render() {
        let s = state(json!({"a": [1, 2]}));
        assert_eq!(s.to_json().unwrap(), json!({"a": [1, 2]}));
        assert_eq!(s.actor().as_str(), "local");
    }

    #[test]
    fn test_create_rejects_empty_actor() {
        let err = State::new(&json!(1), "", &StateOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::Clock(_)));
    }

    #[test]
    fn test_apply_patch_is_immutable() {
        let s = state(json!({"a": 1}));
        let next = s
            .apply_patch(
                &parse(r#"[{"op":"add","path":"/b","value":2}]"#),
                &ApplyOptions::default(),
            )
            .unwrap();
        assert_eq!(s.to_json().unwrap(), json!({"a": 1}));
        assert_eq!(next.to_json().unwrap(), json!({"a": 1, "b": 2}));
        assert!(next.clock().ctr() > s.clock().ctr());
    }

    #[test]
    fn test_failed_apply_leaves_input_untouched() {
        let s = state(json!({"a": 1}));
        let err = s
            .apply_patch(
                &parse(
                    r#"[
                        {"op":"add","path":"/b","value":2},
                        {"op":"remove","path":"/missing"}
                    ]"#,
                ),
                &ApplyOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::MissingTarget);
        assert_eq!(err.op_index, Some(1));
        assert_eq!(s.to_json().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_in_place_atomic_restores_on_failure() {
        let mut s = state(json!({"a": 1}));
        let ctr_before = s.clock().ctr();
        let err = s
            .apply_patch_in_place(
                &parse(
                    r#"[
                        {"op":"add","path":"/b","value":2},
                        {"op":"test","path":"/a","value":999}
                    ]"#,
                ),
                &InPlaceOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::TestFailed);
        assert_eq!(s.to_json().unwrap(), json!({"a": 1}));
        assert_eq!(s.clock().ctr(), ctr_before);
    }

    #[test]
    fn test_in_place_non_atomic_keeps_partial_effects() {
        let mut s = state(json!({"a": 1}));
        let opts = InPlaceOptions {
            atomic: false,
            ..InPlaceOptions::default()
        };
        let err = s
            .apply_patch_in_place(
                &parse(
                    r#"[
                        {"op":"add","path":"/b","value":2},
                        {"op":"test","path":"/a","value":999}
                    ]"#,
                ),
                &opts,
            )
            .unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::TestFailed);
        assert_eq!(s.to_json().unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_fork_rejects_actor_reuse_by_default() {
        let s = state(json!(1));
        let err = s.fork("local", &ForkOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::ActorReuse { .. }));

        let forked = s
            .fork(
                "local",
                &ForkOptions {
                    allow_actor_reuse: true,
                },
            )
            .unwrap();
        assert_eq!(forked.clock().ctr(), s.clock().ctr());
    }

    #[test]
    fn test_validate_json_patch_does_not_mutate() {
        let s = state(json!({"a": 1}));
        assert!(s
            .validate_json_patch(&parse(r#"[{"op":"replace","path":"/a","value":2}]"#))
            .is_ok());
        let err = s
            .validate_json_patch(&parse(r#"[{"op":"remove","path":"/zzz"}]"#))
            .unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::MissingTarget);
        assert_eq!(s.to_json().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_merge_states_converges() {
        let origin = state(json!({"list": [1]}));
        let a = origin.fork("a", &ForkOptions::default()).unwrap();
        let b = origin.fork("b", &ForkOptions::default()).unwrap();

        let a = a
            .apply_patch(
                &parse(r#"[{"op":"add","path":"/list/-","value":2}]"#),
                &ApplyOptions::default(),
            )
            .unwrap();
        let b = b
            .apply_patch(
                &parse(r#"[{"op":"add","path":"/x","value":true}]"#),
                &ApplyOptions::default(),
            )
            .unwrap();

        let ab = a.merge(&b, &StateMergeOptions::new()).unwrap();
        let ba = b.merge(&a, &StateMergeOptions::new()).unwrap();
        assert_eq!(ab.to_json().unwrap(), ba.to_json().unwrap());
        assert_eq!(ab.actor(), a.actor());
        assert_eq!(ba.actor(), b.actor());
    }

    #[test]
    fn test_serialize_round_trip_fast_forwards_clock() {
        let s = state(json!({"k": [1, 2, 3]}));
        let text = s.serialize().unwrap();
        let restored = State::deserialize(&text).unwrap();
        assert_eq!(restored.to_json().unwrap(), s.to_json().unwrap());
        assert!(restored.clock().ctr() >= s.clock().ctr());

        // A stale clock counter in the wire text is corrected upward.
        let mut tampered: serde_json::Value = serde_json::from_str(&text).unwrap();
        tampered["clock"]["ctr"] = json!(0);
        let restored = State::deserialize(&tampered.to_string()).unwrap();
        assert_eq!(restored.clock().ctr(), s.clock().ctr());
    }

    #[test]
    fn test_diff_json_patch_between_states() {
        let a = state(json!({"x": 1}));
        let b = a
            .apply_patch(
                &parse(r#"[{"op":"add","path":"/y","value":2}]"#),
                &ApplyOptions::default(),
            )
            .unwrap();
        let patch = a.diff_json_patch(&b, &DiffOptions::default()).unwrap();
        assert_eq!(
            patch,
            vec![PatchOp::Add {
                path: "/y".into(),
                value: json!(2)
            }]
        );
    }

    #[test]
    fn test_apply_patch_as_actor_records_dots() {
        let s = state(json!({"l": [1]}));
        let vv = VersionVector::new();
        let (doc, vv) = apply_patch_as_actor(
            s.doc(),
            &vv,
            "remote",
            &parse(r#"[{"op":"add","path":"/l/-","value":2}]"#),
            &ApplyOptions::default(),
        )
        .unwrap();
        assert_eq!(
            crdt_doc::materialize_doc(&doc).unwrap(),
            json!({"l": [1, 2]})
        );
        let remote = ActorId::new("remote").unwrap();
        assert!(vv.get(&remote) > 0);
    }

    #[test]
    fn test_crdt_to_full_replace() {
        let s = state(json!({"a": 1}));
        let patch = crdt_to_full_replace(s.doc()).unwrap();
        assert_eq!(
            patch,
            vec![PatchOp::Replace {
                path: "".into(),
                value: json!({"a": 1})
            }]
        );
    }

    #[test]
    fn test_version_vector_covers_doc_and_clock() {
        let s = state(json!({"a": [1]}));
        let vv = s.version_vector();
        assert_eq!(vv.get(s.actor()), s.clock().ctr());
    }
}
