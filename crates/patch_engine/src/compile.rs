//! Intent compiler: RFC 6902 patch + base JSON → typed intents.
//!
//! Under `sequential` semantics (the default) each operation resolves
//! against a copy-on-write [`Shadow`] of the base that has absorbed the
//! effects of the operations before it; under `base` semantics every
//! operation resolves against the original base and the shadow is never
//! updated. Compilation is deterministic: the same (base, patch, options)
//! triple always yields the same intent list, independent of object key
//! insertion order.

use crate::error::{PatchError, PatchErrorKind};
use crate::intent::{CompiledIntent, Intent, InsertPos, SetMode};
use crate::shadow::{Shadow, ShadowKind, ShadowRef};
use crdt_doc::{MAX_TRAVERSAL_DEPTH, ROOT_KEY};
use patch_model::{ArrayToken, PatchOp, Pointer};
use serde_json::Value;

/// How operations resolve against the evolving document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Semantics {
    /// Each op sees the base as modified by the ops before it.
    #[default]
    Sequential,
    /// Every op sees the original base.
    Base,
}

/// Validation applied to JSON values carried by the patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JsonValidation {
    /// Accept values as-is.
    #[default]
    None,
    /// Walk values, reject non-finite numbers, enforce the depth bound.
    Strict,
    /// Like `Strict`; values `serde_json` can represent are already in
    /// normal form, so no rewriting is needed.
    Normalize,
}

/// Options for [`compile_patch`].
#[derive(Clone, Debug, Default)]
pub struct CompileOptions {
    /// Resolution semantics.
    pub semantics: Semantics,
    /// Value validation mode.
    pub json_validation: JsonValidation,
    /// Refuse the add-at-0/append auto-creation of absent array parents.
    pub strict_parents: bool,
}

/// Compile a patch against a base JSON value.
pub fn compile_patch(
    base: &Value,
    patch: &[PatchOp],
    opts: &CompileOptions,
) -> Result<Vec<CompiledIntent>, PatchError> {
    let mut compiler = Compiler {
        shadow: Shadow::of(base),
        sequential: opts.semantics == Semantics::Sequential,
        validation: opts.json_validation,
        strict_parents: opts.strict_parents,
        out: Vec::new(),
    };
    for (op_index, op) in patch.iter().enumerate() {
        compiler.op(op, op_index)?;
    }
    Ok(compiler.out)
}

/// Map a patch path into slot space: the virtual root entry's key becomes
/// the first token.
fn slot(ptr: &Pointer) -> Pointer {
    let mut tokens = Vec::with_capacity(ptr.len() + 1);
    tokens.push(ROOT_KEY.to_string());
    tokens.extend(ptr.tokens().iter().cloned());
    Pointer::from_tokens(tokens)
}

struct Compiler<'a> {
    shadow: Shadow<'a>,
    sequential: bool,
    validation: JsonValidation,
    strict_parents: bool,
    out: Vec<CompiledIntent>,
}

impl<'a> Compiler<'a> {
    fn op(&mut self, op: &PatchOp, idx: usize) -> Result<(), PatchError> {
        let path = parse_pointer(op.path(), idx)?;
        match op {
            PatchOp::Add { value, .. } => {
                self.validate_value(value, idx)?;
                self.add(&path, value.clone(), idx)
            }
            PatchOp::Remove { .. } => self.remove(&path, idx),
            PatchOp::Replace { value, .. } => {
                self.validate_value(value, idx)?;
                self.replace(&path, value.clone(), idx)
            }
            PatchOp::Move { from, .. } => {
                let from = parse_pointer(from, idx)?;
                self.mv(&from, &path, idx)
            }
            PatchOp::Copy { from, .. } => {
                let from = parse_pointer(from, idx)?;
                let snapshot = self.read(&from, idx)?.to_value();
                self.add(&path, snapshot, idx)
            }
            PatchOp::Test { value, .. } => {
                self.validate_value(value, idx)?;
                self.test(&path, value.clone(), idx)
            }
        }
    }

    /// RFC `add` (also the destination half of move/copy).
    fn add(&mut self, path: &Pointer, value: Value, idx: usize) -> Result<(), PatchError> {
        let Some((parent_ptr, last)) = path.split_last() else {
            self.emit(
                Intent::ObjSet {
                    parent: Pointer::root(),
                    key: ROOT_KEY.to_string(),
                    value: value.clone(),
                    mode: None,
                },
                idx,
            );
            if self.sequential {
                self.shadow.set(value);
            }
            return Ok(());
        };

        let parent = match self.resolve_parent(&parent_ptr, idx) {
            Ok(parent) => parent,
            // An absent array parent is creatable at apply time when the
            // insert targets position 0 or the append sentinel.
            Err(e)
                if e.kind == PatchErrorKind::MissingParent
                    && !self.strict_parents
                    && e.path.as_deref() == Some(parent_ptr.to_string().as_str()) =>
            {
                let index = match ArrayToken::parse(last) {
                    Some(ArrayToken::Index(0)) => InsertPos::At(0),
                    Some(ArrayToken::Append) => InsertPos::End,
                    _ => return Err(e),
                };
                // The slot can only be created inside an object.
                let (grand, parent_key) = parent_ptr
                    .split_last()
                    .expect("a root parent always resolves");
                if self.resolve_parent(&grand, idx)?.kind() != ShadowKind::Object {
                    return Err(e);
                }
                let parent_key = parent_key.to_string();
                self.emit(
                    Intent::ArrInsert {
                        parent: slot(&parent_ptr),
                        index,
                        value: value.clone(),
                    },
                    idx,
                );
                if self.sequential {
                    self.shadow_at_mut(&grand)
                        .obj_set(&parent_key, Value::Array(vec![value]));
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match parent.kind() {
            ShadowKind::Object => {
                reject_proto(last, path, idx)?;
                let key = last.to_string();
                self.emit(
                    Intent::ObjSet {
                        parent: slot(&parent_ptr),
                        key: key.clone(),
                        value: value.clone(),
                        mode: Some(SetMode::Add),
                    },
                    idx,
                );
                if self.sequential {
                    self.shadow_at_mut(&parent_ptr).obj_set(&key, value);
                }
                Ok(())
            }
            ShadowKind::Array => {
                let len = parent.array_len().expect("kind checked");
                let index = match ArrayToken::parse(last) {
                    Some(ArrayToken::Append) => InsertPos::End,
                    Some(ArrayToken::Index(i)) if i <= len => InsertPos::At(i),
                    Some(ArrayToken::Index(_)) => {
                        return Err(PatchError::new(
                            PatchErrorKind::OutOfBounds,
                            path.to_string(),
                            idx,
                            "insert index past the end of the array",
                        ))
                    }
                    None => {
                        return Err(PatchError::new(
                            PatchErrorKind::InvalidPointer,
                            path.to_string(),
                            idx,
                            "not a valid array index token",
                        ))
                    }
                };
                self.emit(
                    Intent::ArrInsert {
                        parent: slot(&parent_ptr),
                        index,
                        value: value.clone(),
                    },
                    idx,
                );
                if self.sequential {
                    let at = match index {
                        InsertPos::At(i) => Some(i),
                        InsertPos::End => None,
                    };
                    self.shadow_at_mut(&parent_ptr).arr_insert(at, value);
                }
                Ok(())
            }
            ShadowKind::Primitive => Err(PatchError::new(
                PatchErrorKind::InvalidTarget,
                parent_ptr.to_string(),
                idx,
                "cannot add into a primitive value",
            )),
        }
    }

    /// RFC `remove` (also the source half of move).
    fn remove(&mut self, path: &Pointer, idx: usize) -> Result<(), PatchError> {
        let Some((parent_ptr, last)) = path.split_last() else {
            return Err(PatchError::new(
                PatchErrorKind::InvalidTarget,
                "",
                idx,
                "cannot remove the document root",
            ));
        };

        let parent = self.resolve_parent(&parent_ptr, idx)?;
        match parent.kind() {
            ShadowKind::Object => {
                if !parent.has_key(last) {
                    return Err(PatchError::new(
                        PatchErrorKind::MissingTarget,
                        path.to_string(),
                        idx,
                        "no such key to remove",
                    ));
                }
                let key = last.to_string();
                self.emit(
                    Intent::ObjRemove {
                        parent: slot(&parent_ptr),
                        key: key.clone(),
                    },
                    idx,
                );
                if self.sequential {
                    self.shadow_at_mut(&parent_ptr).obj_remove(&key);
                }
                Ok(())
            }
            ShadowKind::Array => {
                let len = parent.array_len().expect("kind checked");
                let i = parse_existing_index(last, len, path, idx)?;
                self.emit(
                    Intent::ArrDelete {
                        parent: slot(&parent_ptr),
                        index: i,
                    },
                    idx,
                );
                if self.sequential {
                    self.shadow_at_mut(&parent_ptr).arr_delete(i);
                }
                Ok(())
            }
            ShadowKind::Primitive => Err(PatchError::new(
                PatchErrorKind::InvalidTarget,
                parent_ptr.to_string(),
                idx,
                "cannot remove from a primitive value",
            )),
        }
    }

    /// RFC `replace`.
    fn replace(&mut self, path: &Pointer, value: Value, idx: usize) -> Result<(), PatchError> {
        let Some((parent_ptr, last)) = path.split_last() else {
            self.emit(
                Intent::ObjSet {
                    parent: Pointer::root(),
                    key: ROOT_KEY.to_string(),
                    value: value.clone(),
                    mode: None,
                },
                idx,
            );
            if self.sequential {
                self.shadow.set(value);
            }
            return Ok(());
        };

        let parent = self.resolve_parent(&parent_ptr, idx)?;
        match parent.kind() {
            ShadowKind::Object => {
                reject_proto(last, path, idx)?;
                if !parent.has_key(last) {
                    return Err(PatchError::new(
                        PatchErrorKind::MissingTarget,
                        path.to_string(),
                        idx,
                        "no such key to replace",
                    ));
                }
                let key = last.to_string();
                self.emit(
                    Intent::ObjSet {
                        parent: slot(&parent_ptr),
                        key: key.clone(),
                        value: value.clone(),
                        mode: Some(SetMode::Replace),
                    },
                    idx,
                );
                if self.sequential {
                    self.shadow_at_mut(&parent_ptr).obj_set(&key, value);
                }
                Ok(())
            }
            ShadowKind::Array => {
                let len = parent.array_len().expect("kind checked");
                let i = parse_existing_index(last, len, path, idx)?;
                self.emit(
                    Intent::ArrReplace {
                        parent: slot(&parent_ptr),
                        index: i,
                        value: value.clone(),
                    },
                    idx,
                );
                if self.sequential {
                    self.shadow_at_mut(&parent_ptr).arr_replace(i, value);
                }
                Ok(())
            }
            ShadowKind::Primitive => Err(PatchError::new(
                PatchErrorKind::InvalidTarget,
                parent_ptr.to_string(),
                idx,
                "cannot replace inside a primitive value",
            )),
        }
    }

    /// RFC `move`: snapshot first; arrays delete-then-insert, objects
    /// set-then-remove.
    fn mv(&mut self, from: &Pointer, path: &Pointer, idx: usize) -> Result<(), PatchError> {
        if from == path {
            return Ok(());
        }
        if from.is_prefix_of(path) {
            return Err(PatchError::new(
                PatchErrorKind::InvalidTarget,
                path.to_string(),
                idx,
                "cannot move a value into its own descendant",
            ));
        }
        let snapshot = self.read(from, idx)?.to_value();

        let (from_parent, _) = from
            .split_last()
            .expect("a root `from` is always a prefix of any distinct path");
        let from_parent_kind = self.resolve_parent(&from_parent, idx)?.kind();

        if from_parent_kind == ShadowKind::Array {
            self.remove(from, idx)?;
            self.add(path, snapshot, idx)
        } else {
            self.add(path, snapshot, idx)?;
            self.remove(from, idx)
        }
    }

    /// RFC `test`: validated for pointer syntax, evaluated by the applier.
    fn test(&mut self, path: &Pointer, value: Value, idx: usize) -> Result<(), PatchError> {
        match self.read(path, idx) {
            Ok(_) => {}
            Err(e) if e.kind == PatchErrorKind::InvalidPointer => return Err(e),
            // Whether the location exists is decided at apply time against
            // the chosen source.
            Err(_) => {}
        }
        self.emit(
            Intent::Test {
                path: slot(path),
                value,
            },
            idx,
        );
        Ok(())
    }

    fn emit(&mut self, intent: Intent, op_index: usize) {
        self.out.push(CompiledIntent::new(intent, op_index));
    }

    /// Resolve the container an operation's final token lives in.
    fn resolve_parent(
        &self,
        parent: &Pointer,
        idx: usize,
    ) -> Result<ShadowRef<'_, 'a>, PatchError> {
        resolve(
            &self.shadow,
            parent,
            idx,
            PatchErrorKind::MissingParent,
            PatchErrorKind::MissingParent,
        )
    }

    /// Resolve a full path for reading (move/copy sources, tests).
    fn read(&self, path: &Pointer, idx: usize) -> Result<ShadowRef<'_, 'a>, PatchError> {
        resolve(
            &self.shadow,
            path,
            idx,
            PatchErrorKind::MissingTarget,
            PatchErrorKind::OutOfBounds,
        )
    }

    /// Mutable navigation along a path that was just resolved.
    fn shadow_at_mut(&mut self, ptr: &Pointer) -> &mut Shadow<'a> {
        let mut current = &mut self.shadow;
        for token in ptr.tokens() {
            let index = match ArrayToken::parse(token) {
                Some(ArrayToken::Index(i)) => Some(i),
                _ => None,
            };
            current = current
                .child_mut(token, index)
                .expect("path was resolved before mutation");
        }
        current
    }

    fn validate_value(&self, value: &Value, idx: usize) -> Result<(), PatchError> {
        validate_json(value, self.validation).map_err(|mut e| {
            e.op_index = Some(idx);
            e
        })
    }
}

/// Walk a JSON value under the given validation mode: bounded depth, no
/// non-finite numbers. `None` skips the walk entirely.
pub fn validate_json(value: &Value, mode: JsonValidation) -> Result<(), PatchError> {
    if mode == JsonValidation::None {
        return Ok(());
    }
    let mut stack: Vec<(&Value, usize)> = vec![(value, 1)];
    while let Some((value, depth)) = stack.pop() {
        if depth > MAX_TRAVERSAL_DEPTH {
            return Err(PatchError::bare(
                PatchErrorKind::MaxDepthExceeded,
                "value exceeds the max traversal depth",
            ));
        }
        match value {
            Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    if !f.is_finite() {
                        return Err(PatchError::bare(
                            PatchErrorKind::NonFiniteNumber,
                            "value contains a non-finite number",
                        ));
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    stack.push((item, depth + 1));
                }
            }
            Value::Object(map) => {
                for item in map.values() {
                    stack.push((item, depth + 1));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_pointer(text: &str, idx: usize) -> Result<Pointer, PatchError> {
    Pointer::parse(text).map_err(|e| {
        PatchError::new(
            PatchErrorKind::InvalidPointer,
            text.to_string(),
            idx,
            e.to_string(),
        )
    })
}

fn reject_proto(key: &str, path: &Pointer, idx: usize) -> Result<(), PatchError> {
    if key == "__proto__" {
        return Err(PatchError::new(
            PatchErrorKind::InvalidTarget,
            path.to_string(),
            idx,
            "__proto__ is not a writable key",
        ));
    }
    Ok(())
}

/// Parse an index token that must address an existing element.
fn parse_existing_index(
    token: &str,
    len: usize,
    path: &Pointer,
    idx: usize,
) -> Result<usize, PatchError> {
    match ArrayToken::parse(token) {
        Some(ArrayToken::Index(i)) if i < len => Ok(i),
        Some(ArrayToken::Index(_)) => Err(PatchError::new(
            PatchErrorKind::OutOfBounds,
            path.to_string(),
            idx,
            "index past the end of the array",
        )),
        Some(ArrayToken::Append) => Err(PatchError::new(
            PatchErrorKind::InvalidPointer,
            path.to_string(),
            idx,
            "the append sentinel cannot address an existing element",
        )),
        None => Err(PatchError::new(
            PatchErrorKind::InvalidPointer,
            path.to_string(),
            idx,
            "not a valid array index token",
        )),
    }
}

/// Resolve a path against the shadow with the fixed lookup-error mapping.
fn resolve<'s, 'a>(
    shadow: &'s Shadow<'a>,
    path: &Pointer,
    idx: usize,
    missing_final: PatchErrorKind,
    oob_final: PatchErrorKind,
) -> Result<ShadowRef<'s, 'a>, PatchError> {
    let tokens = path.tokens();
    let mut current = ShadowRef::Node(shadow);
    for (i, token) in tokens.iter().enumerate() {
        let here = || Pointer::from_tokens(tokens[..=i].to_vec()).to_string();
        let at_target = i + 1 == tokens.len();
        current = match current.kind() {
            ShadowKind::Object => current.get_key(token).ok_or_else(|| {
                let kind = if at_target {
                    missing_final
                } else {
                    PatchErrorKind::MissingParent
                };
                PatchError::new(kind, here(), idx, "no such key")
            })?,
            ShadowKind::Array => match ArrayToken::parse(token) {
                Some(ArrayToken::Index(n)) => current.get_index(n).ok_or_else(|| {
                    let kind = if at_target {
                        oob_final
                    } else {
                        PatchErrorKind::MissingParent
                    };
                    PatchError::new(kind, here(), idx, "index past the end of the array")
                })?,
                Some(ArrayToken::Append) | None => {
                    return Err(PatchError::new(
                        PatchErrorKind::InvalidPointer,
                        here(),
                        idx,
                        "not a valid array index token",
                    ))
                }
            },
            ShadowKind::Primitive => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(base: Value, patch_text: &str) -> Result<Vec<CompiledIntent>, PatchError> {
        let patch: Vec<PatchOp> = serde_json::from_str(patch_text).unwrap();
        compile_patch(&base, &patch, &CompileOptions::default())
    }

    fn compile_base_mode(base: Value, patch_text: &str) -> Result<Vec<CompiledIntent>, PatchError> {
        let patch: Vec<PatchOp> = serde_json::from_str(patch_text).unwrap();
        compile_patch(
            &base,
            &patch,
            &CompileOptions {
                semantics: Semantics::Base,
                ..CompileOptions::default()
            },
        )
    }

    #[test]
    fn test_add_to_object_compiles_to_obj_set() {
        let intents = compile(json!({"a": 1}), r#"[{"op":"add","path":"/b","value":2}]"#).unwrap();
        assert_eq!(intents.len(), 1);
        match &intents[0].intent {
            Intent::ObjSet { parent, key, mode, .. } => {
                assert_eq!(parent.tokens(), [ROOT_KEY]);
                assert_eq!(key, "b");
                assert_eq!(*mode, Some(SetMode::Add));
            }
            other => panic!("unexpected intent {other:?}"),
        }
    }

    #[test]
    fn test_root_replace_targets_virtual_root_key() {
        let intents = compile(json!(1), r#"[{"op":"replace","path":"","value":{"a":1}}]"#).unwrap();
        match &intents[0].intent {
            Intent::ObjSet { parent, key, mode, .. } => {
                assert!(parent.is_root());
                assert_eq!(key, ROOT_KEY);
                assert_eq!(*mode, None);
            }
            other => panic!("unexpected intent {other:?}"),
        }
    }

    #[test]
    fn test_root_remove_is_invalid_target() {
        let err = compile(json!({"a": 1}), r#"[{"op":"remove","path":""}]"#).unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::InvalidTarget);
        assert_eq!(err.op_index, Some(0));
    }

    #[test]
    fn test_sequential_semantics_tracks_earlier_ops() {
        // [add /list/1 9, replace /list/1 20] over [1, 2].
        let intents = compile(
            json!({"list": [1, 2]}),
            r#"[
                {"op":"add","path":"/list/1","value":9},
                {"op":"replace","path":"/list/1","value":20}
            ]"#,
        )
        .unwrap();
        assert_eq!(intents.len(), 2);
        assert!(matches!(
            intents[0].intent,
            Intent::ArrInsert { index: InsertPos::At(1), .. }
        ));
        // Under sequential semantics the replace targets index 1, which is
        // now the freshly inserted element.
        assert!(matches!(intents[1].intent, Intent::ArrReplace { index: 1, .. }));
    }

    #[test]
    fn test_base_semantics_never_updates_the_shadow() {
        // The same patch in base mode: both ops address the original base.
        let intents = compile_base_mode(
            json!({"list": [1, 2]}),
            r#"[
                {"op":"add","path":"/list/1","value":9},
                {"op":"replace","path":"/list/1","value":20}
            ]"#,
        )
        .unwrap();
        assert!(matches!(intents[1].intent, Intent::ArrReplace { index: 1, .. }));

        // Removing twice at the same index works in base mode (both resolve
        // against the original array) but fails sequentially (the second
        // index is out of bounds after the first removal).
        let patch = r#"[
            {"op":"remove","path":"/list/1"},
            {"op":"remove","path":"/list/1"}
        ]"#;
        assert!(compile_base_mode(json!({"list": [1, 2]}), patch).is_ok());
        let err = compile(json!({"list": [1, 2]}), patch).unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::OutOfBounds);
        assert_eq!(err.op_index, Some(1));
    }

    #[test]
    fn test_self_move_compiles_to_nothing() {
        let intents = compile(
            json!({"a": 1}),
            r#"[{"op":"move","from":"/a","path":"/a"}]"#,
        )
        .unwrap();
        assert!(intents.is_empty());
    }

    #[test]
    fn test_move_into_descendant_rejected() {
        let err = compile(
            json!({"a": {"b": 1}}),
            r#"[{"op":"move","from":"/a","path":"/a/b/c"}]"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::InvalidTarget);

        // Root moves into a descendant fall under the same rule.
        let err = compile(
            json!({"a": 1}),
            r#"[{"op":"move","from":"","path":"/a"}]"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::InvalidTarget);
    }

    #[test]
    fn test_object_move_is_set_then_remove() {
        let intents = compile(
            json!({"a": {"x": 1}, "b": {}}),
            r#"[{"op":"move","from":"/a","path":"/b/moved"}]"#,
        )
        .unwrap();
        assert_eq!(intents.len(), 2);
        assert!(matches!(&intents[0].intent, Intent::ObjSet { key, .. } if key == "moved"));
        assert!(matches!(&intents[1].intent, Intent::ObjRemove { key, .. } if key == "a"));
        // The moved value is the pre-removal snapshot.
        match &intents[0].intent {
            Intent::ObjSet { value, .. } => assert_eq!(value, &json!({"x": 1})),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_array_move_is_delete_then_insert() {
        let intents = compile(
            json!({"list": ["a", "b", "c"]}),
            r#"[{"op":"move","from":"/list/0","path":"/list/2"}]"#,
        )
        .unwrap();
        assert_eq!(intents.len(), 2);
        assert!(matches!(intents[0].intent, Intent::ArrDelete { index: 0, .. }));
        // The destination resolves after the delete: index 2 of ["b","c"]
        // appends at the end.
        assert!(matches!(
            intents[1].intent,
            Intent::ArrInsert { index: InsertPos::At(2), .. }
        ));
    }

    #[test]
    fn test_copy_emits_no_removal() {
        let intents = compile(
            json!({"a": [1], "b": {}}),
            r#"[{"op":"copy","from":"/a","path":"/b/c"}]"#,
        )
        .unwrap();
        assert_eq!(intents.len(), 1);
        match &intents[0].intent {
            Intent::ObjSet { value, .. } => assert_eq!(value, &json!([1])),
            other => panic!("unexpected intent {other:?}"),
        }
    }

    #[test]
    fn test_append_sentinel_only_for_add() {
        let intents = compile(
            json!({"list": [1]}),
            r#"[{"op":"add","path":"/list/-","value":2}]"#,
        )
        .unwrap();
        assert!(matches!(
            intents[0].intent,
            Intent::ArrInsert { index: InsertPos::End, .. }
        ));

        for op in ["remove", "replace"] {
            let text = format!(r#"[{{"op":"{op}","path":"/list/-","value":0}}]"#);
            let text = if op == "remove" {
                r#"[{"op":"remove","path":"/list/-"}]"#.to_string()
            } else {
                text
            };
            let err = compile(json!({"list": [1]}), &text).unwrap_err();
            assert_eq!(err.kind, PatchErrorKind::InvalidPointer, "op {op}");
        }
    }

    #[test]
    fn test_leading_zero_index_contextual() {
        // On an array parent the token is an invalid index.
        let err = compile(
            json!({"arr": [1, 2]}),
            r#"[{"op":"remove","path":"/arr/01"}]"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::InvalidPointer);

        // On an object parent the same token is an ordinary key.
        let intents = compile(
            json!({"obj": {"01": 1}}),
            r#"[{"op":"remove","path":"/obj/01"}]"#,
        )
        .unwrap();
        assert!(matches!(&intents[0].intent, Intent::ObjRemove { key, .. } if key == "01"));
    }

    #[test]
    fn test_proto_key_rejected() {
        let err = compile(
            json!({}),
            r#"[{"op":"add","path":"/__proto__","value":{"polluted":true}}]"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::InvalidTarget);
    }

    #[test]
    fn test_missing_parent_and_target() {
        let err = compile(json!({}), r#"[{"op":"add","path":"/a/b","value":1}]"#).unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::MissingParent);

        let err = compile(json!({}), r#"[{"op":"replace","path":"/a","value":1}]"#).unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::MissingTarget);

        let err = compile(json!({}), r#"[{"op":"remove","path":"/a"}]"#).unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::MissingTarget);
    }

    #[test]
    fn test_test_compiles_with_slot_path() {
        let intents = compile(
            json!({"a": 1}),
            r#"[{"op":"test","path":"/a","value":1}]"#,
        )
        .unwrap();
        match &intents[0].intent {
            Intent::Test { path, value } => {
                assert_eq!(path.tokens(), [ROOT_KEY, "a"]);
                assert_eq!(value, &json!(1));
            }
            other => panic!("unexpected intent {other:?}"),
        }
        // A test against a location that may exist at apply time compiles.
        assert!(compile(json!({}), r#"[{"op":"test","path":"/later","value":1}]"#).is_ok());
    }

    #[test]
    fn test_compilation_is_deterministic_across_key_orders() {
        // The same object expressed with different key insertion orders.
        let a: Value = serde_json::from_str(r#"{"x": 1, "a": 2, "m": 3}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"m": 3, "x": 1, "a": 2}"#).unwrap();
        let patch = r#"[
            {"op":"add","path":"/z","value":{"k2": 1, "k1": 2}},
            {"op":"remove","path":"/a"}
        ]"#;
        let ia = compile(a, patch).unwrap();
        let ib = compile(b, patch).unwrap();
        assert_eq!(ia, ib);
    }

    #[test]
    fn test_absent_array_parent_auto_create_compiles() {
        // Index 0 and the append sentinel compile to inserts that create
        // the sequence at apply time.
        for path in ["/list/0", "/list/-"] {
            let text = format!(r#"[{{"op":"add","path":"{path}","value":1}}]"#);
            let intents = compile(json!({}), &text).unwrap();
            assert!(matches!(intents[0].intent, Intent::ArrInsert { .. }), "{path}");
        }
        // Any other index is a missing parent.
        let err = compile(json!({}), r#"[{"op":"add","path":"/list/1","value":1}]"#).unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::MissingParent);

        // Sequential follow-ups see the created array.
        let intents = compile(
            json!({}),
            r#"[
                {"op":"add","path":"/list/0","value":1},
                {"op":"add","path":"/list/1","value":2}
            ]"#,
        )
        .unwrap();
        assert!(matches!(
            intents[1].intent,
            Intent::ArrInsert { index: InsertPos::At(1), .. }
        ));
    }

    #[test]
    fn test_strict_parents_rejects_auto_create_at_compile() {
        let patch: Vec<PatchOp> =
            serde_json::from_str(r#"[{"op":"add","path":"/list/0","value":1}]"#).unwrap();
        let opts = CompileOptions {
            strict_parents: true,
            ..CompileOptions::default()
        };
        let err = compile_patch(&json!({}), &patch, &opts).unwrap_err();
        assert_eq!(err.kind, PatchErrorKind::MissingParent);
    }

    #[test]
    fn test_strict_validation_walks_values() {
        let patch: Vec<PatchOp> =
            serde_json::from_str(r#"[{"op":"add","path":"/a","value":[1, 2.5]}]"#).unwrap();
        let opts = CompileOptions {
            json_validation: JsonValidation::Strict,
            ..CompileOptions::default()
        };
        assert!(compile_patch(&json!({}), &patch, &opts).is_ok());
    }
}
