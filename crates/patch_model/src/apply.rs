//! Literal RFC 6902 applier over plain JSON values.
//!
//! This is the reference semantics the CRDT engine is held against: apply a
//! patch to a `serde_json::Value` exactly as the RFC prescribes, with the
//! same closed error set the engine reports. Used for patch preflight
//! validation and by the equivalence tests.

use crate::error::{ApplyError, ApplyErrorKind};
use crate::op::PatchOp;
use crate::pointer::{ArrayToken, Pointer};
use serde_json::Value;

/// Apply a patch to `doc` in place, stopping at the first failing op.
///
/// On error the document may be partially patched; use
/// [`apply_patch_copy`] for an all-or-nothing result.
pub fn apply_patch(doc: &mut Value, patch: &[PatchOp]) -> Result<(), ApplyError> {
    for (op_index, op) in patch.iter().enumerate() {
        apply_op(doc, op, op_index)?;
    }
    Ok(())
}

/// Apply a patch to a copy of `doc`, returning the patched value.
pub fn apply_patch_copy(doc: &Value, patch: &[PatchOp]) -> Result<Value, ApplyError> {
    let mut copy = doc.clone();
    apply_patch(&mut copy, patch)?;
    Ok(copy)
}

fn apply_op(doc: &mut Value, op: &PatchOp, op_index: usize) -> Result<(), ApplyError> {
    let path = parse_pointer(op.path(), op_index)?;
    match op {
        PatchOp::Add { value, .. } => add(doc, &path, value.clone(), op_index),
        PatchOp::Remove { .. } => remove(doc, &path, op_index).map(|_| ()),
        PatchOp::Replace { value, .. } => replace(doc, &path, value.clone(), op_index),
        PatchOp::Move { from, .. } => {
            let from = parse_pointer(from, op_index)?;
            if from == path {
                return Ok(());
            }
            if from.is_prefix_of(&path) {
                return Err(ApplyError::new(
                    ApplyErrorKind::InvalidTarget,
                    path.to_string(),
                    op_index,
                ));
            }
            // Snapshot, then remove, then add: path resolves post-removal.
            let value = read(doc, &from, op_index)?.clone();
            remove(doc, &from, op_index)?;
            add(doc, &path, value, op_index)
        }
        PatchOp::Copy { from, .. } => {
            let from = parse_pointer(from, op_index)?;
            let value = read(doc, &from, op_index)?.clone();
            add(doc, &path, value, op_index)
        }
        PatchOp::Test { value, .. } => {
            let actual = match read(doc, &path, op_index) {
                Ok(v) => v,
                Err(e) if e.kind == ApplyErrorKind::InvalidPointer => return Err(e),
                // A location that cannot be resolved fails the assertion.
                Err(_) => {
                    return Err(ApplyError::new(
                        ApplyErrorKind::TestFailed,
                        path.to_string(),
                        op_index,
                    ))
                }
            };
            if actual != value {
                return Err(ApplyError::new(
                    ApplyErrorKind::TestFailed,
                    path.to_string(),
                    op_index,
                ));
            }
            Ok(())
        }
    }
}

fn parse_pointer(text: &str, op_index: usize) -> Result<Pointer, ApplyError> {
    Pointer::parse(text)
        .map_err(|_| ApplyError::new(ApplyErrorKind::InvalidPointer, text.to_string(), op_index))
}

/// Walk to the parent container of `path`'s last token.
fn parent_mut<'a>(
    doc: &'a mut Value,
    path: &Pointer,
    op_index: usize,
) -> Result<(&'a mut Value, String), ApplyError> {
    let (parent, last) = path
        .split_last()
        .expect("root paths are handled by the callers");
    let mut current = doc;
    for (i, token) in parent.tokens().iter().enumerate() {
        let here = Pointer::from_tokens(parent.tokens()[..=i].to_vec());
        current = step(current, token, &here, op_index, ApplyErrorKind::MissingParent)?;
    }
    Ok((current, last.to_string()))
}

/// Descend one token during traversal.
fn step<'a>(
    value: &'a mut Value,
    token: &str,
    here: &Pointer,
    op_index: usize,
    missing: ApplyErrorKind,
) -> Result<&'a mut Value, ApplyError> {
    match value {
        Value::Object(map) => map
            .get_mut(token)
            .ok_or_else(|| ApplyError::new(missing, here.to_string(), op_index)),
        Value::Array(arr) => match ArrayToken::parse(token) {
            Some(ArrayToken::Index(i)) => arr
                .get_mut(i)
                .ok_or_else(|| ApplyError::new(missing, here.to_string(), op_index)),
            // `-` names a position past the end, never an existing element.
            Some(ArrayToken::Append) | None => Err(ApplyError::new(
                ApplyErrorKind::InvalidPointer,
                here.to_string(),
                op_index,
            )),
        },
        _ => Err(ApplyError::new(
            ApplyErrorKind::InvalidTarget,
            here.to_string(),
            op_index,
        )),
    }
}

/// Resolve a value for reading.
fn read<'a>(doc: &'a Value, path: &Pointer, op_index: usize) -> Result<&'a Value, ApplyError> {
    let mut current = doc;
    let tokens = path.tokens();
    for (i, token) in tokens.iter().enumerate() {
        let here = Pointer::from_tokens(tokens[..=i].to_vec());
        let at_target = i + 1 == tokens.len();
        let missing = if at_target {
            ApplyErrorKind::MissingTarget
        } else {
            ApplyErrorKind::MissingParent
        };
        current = match current {
            Value::Object(map) => map
                .get(token)
                .ok_or_else(|| ApplyError::new(missing, here.to_string(), op_index))?,
            Value::Array(arr) => match ArrayToken::parse(token) {
                Some(ArrayToken::Index(idx)) => arr.get(idx).ok_or_else(|| {
                    let kind = if at_target {
                        ApplyErrorKind::OutOfBounds
                    } else {
                        ApplyErrorKind::MissingParent
                    };
                    ApplyError::new(kind, here.to_string(), op_index)
                })?,
                Some(ArrayToken::Append) | None => {
                    return Err(ApplyError::new(
                        ApplyErrorKind::InvalidPointer,
                        here.to_string(),
                        op_index,
                    ))
                }
            },
            _ => {
                return Err(ApplyError::new(
                    ApplyErrorKind::InvalidTarget,
                    here.to_string(),
                    op_index,
                ))
            }
        };
    }
    Ok(current)
}

fn add(doc: &mut Value, path: &Pointer, value: Value, op_index: usize) -> Result<(), ApplyError> {
    if path.is_root() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = parent_mut(doc, path, op_index)?;
    match parent {
        Value::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        Value::Array(arr) => match ArrayToken::parse(&token) {
            Some(ArrayToken::Append) => {
                arr.push(value);
                Ok(())
            }
            Some(ArrayToken::Index(i)) if i <= arr.len() => {
                arr.insert(i, value);
                Ok(())
            }
            Some(ArrayToken::Index(_)) => Err(ApplyError::new(
                ApplyErrorKind::OutOfBounds,
                path.to_string(),
                op_index,
            )),
            None => Err(ApplyError::new(
                ApplyErrorKind::InvalidPointer,
                path.to_string(),
                op_index,
            )),
        },
        _ => Err(ApplyError::new(
            ApplyErrorKind::InvalidTarget,
            path.to_string(),
            op_index,
        )),
    }
}

fn remove(doc: &mut Value, path: &Pointer, op_index: usize) -> Result<Value, ApplyError> {
    if path.is_root() {
        return Err(ApplyError::new(
            ApplyErrorKind::InvalidTarget,
            String::new(),
            op_index,
        ));
    }
    let (parent, token) = parent_mut(doc, path, op_index)?;
    match parent {
        Value::Object(map) => map.remove(&token).ok_or_else(|| {
            ApplyError::new(ApplyErrorKind::MissingTarget, path.to_string(), op_index)
        }),
        Value::Array(arr) => match ArrayToken::parse(&token) {
            Some(ArrayToken::Index(i)) if i < arr.len() => Ok(arr.remove(i)),
            Some(ArrayToken::Index(_)) => Err(ApplyError::new(
                ApplyErrorKind::OutOfBounds,
                path.to_string(),
                op_index,
            )),
            Some(ArrayToken::Append) | None => Err(ApplyError::new(
                ApplyErrorKind::InvalidPointer,
                path.to_string(),
                op_index,
            )),
        },
        _ => Err(ApplyError::new(
            ApplyErrorKind::InvalidTarget,
            path.to_string(),
            op_index,
        )),
    }
}

fn replace(
    doc: &mut Value,
    path: &Pointer,
    value: Value,
    op_index: usize,
) -> Result<(), ApplyError> {
    if path.is_root() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = parent_mut(doc, path, op_index)?;
    match parent {
        Value::Object(map) => match map.get_mut(&token) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ApplyError::new(
                ApplyErrorKind::MissingTarget,
                path.to_string(),
                op_index,
            )),
        },
        Value::Array(arr) => match ArrayToken::parse(&token) {
            Some(ArrayToken::Index(i)) if i < arr.len() => {
                arr[i] = value;
                Ok(())
            }
            Some(ArrayToken::Index(_)) => Err(ApplyError::new(
                ApplyErrorKind::OutOfBounds,
                path.to_string(),
                op_index,
            )),
            Some(ArrayToken::Append) | None => Err(ApplyError::new(
                ApplyErrorKind::InvalidPointer,
                path.to_string(),
                op_index,
            )),
        },
        _ => Err(ApplyError::new(
            ApplyErrorKind::InvalidTarget,
            path.to_string(),
            op_index,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(text: &str) -> Vec<PatchOp> {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_rfc_example_add_and_test() {
        let mut doc = json!([{"name": "Andrew"}, {"name": "Maxim"}]);
        apply_patch(
            &mut doc,
            &patch(
                r#"[
                    {"op": "test", "path": "/0/name", "value": "Andrew"},
                    {"op": "add", "path": "/0/happy", "value": true}
                ]"#,
            ),
        )
        .unwrap();
        assert_eq!(
            doc,
            json!([{"name": "Andrew", "happy": true}, {"name": "Maxim"}])
        );
    }

    #[test]
    fn test_add_into_array_positions() {
        let mut doc = json!({"arr": [1, 3]});
        apply_patch(
            &mut doc,
            &patch(
                r#"[
                    {"op": "add", "path": "/arr/1", "value": 2},
                    {"op": "add", "path": "/arr/-", "value": 4}
                ]"#,
            ),
        )
        .unwrap();
        assert_eq!(doc, json!({"arr": [1, 2, 3, 4]}));
    }

    #[test]
    fn test_add_out_of_bounds() {
        let mut doc = json!({"arr": [1]});
        let err = apply_patch(&mut doc, &patch(r#"[{"op":"add","path":"/arr/5","value":0}]"#))
            .unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::OutOfBounds);
    }

    #[test]
    fn test_leading_zero_index_is_invalid_on_arrays() {
        let mut doc = json!({"arr": [1, 2]});
        let err = apply_patch(&mut doc, &patch(r#"[{"op":"remove","path":"/arr/01"}]"#))
            .unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::InvalidPointer);
    }

    #[test]
    fn test_numeric_looking_object_keys_are_fine() {
        let mut doc = json!({"obj": {"01": "x"}});
        apply_patch(&mut doc, &patch(r#"[{"op":"remove","path":"/obj/01"}]"#)).unwrap();
        assert_eq!(doc, json!({"obj": {}}));
    }

    #[test]
    fn test_remove_root_is_invalid_target() {
        let mut doc = json!({"a": 1});
        let err = apply_patch(&mut doc, &patch(r#"[{"op":"remove","path":""}]"#)).unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::InvalidTarget);
    }

    #[test]
    fn test_replace_root() {
        let mut doc = json!({"a": 1});
        apply_patch(&mut doc, &patch(r#"[{"op":"replace","path":"","value":[1]}]"#)).unwrap();
        assert_eq!(doc, json!([1]));
    }

    #[test]
    fn test_replace_missing_key() {
        let mut doc = json!({});
        let err = apply_patch(
            &mut doc,
            &patch(r#"[{"op":"replace","path":"/a","value":1}]"#),
        )
        .unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::MissingTarget);
    }

    #[test]
    fn test_move_within_array() {
        let mut doc = json!({"arr": ["a", "b", "c"]});
        apply_patch(
            &mut doc,
            &patch(r#"[{"op":"move","from":"/arr/0","path":"/arr/2"}]"#),
        )
        .unwrap();
        assert_eq!(doc, json!({"arr": ["b", "c", "a"]}));
    }

    #[test]
    fn test_move_to_self_is_noop() {
        let mut doc = json!({"a": {"b": 1}});
        apply_patch(&mut doc, &patch(r#"[{"op":"move","from":"/a","path":"/a"}]"#)).unwrap();
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_move_into_own_child_rejected() {
        let mut doc = json!({"a": {"b": 1}});
        let err = apply_patch(
            &mut doc,
            &patch(r#"[{"op":"move","from":"/a","path":"/a/b/c"}]"#),
        )
        .unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::InvalidTarget);
    }

    #[test]
    fn test_copy_keeps_source() {
        let mut doc = json!({"a": [1], "b": {}});
        apply_patch(
            &mut doc,
            &patch(r#"[{"op":"copy","from":"/a","path":"/b/copy"}]"#),
        )
        .unwrap();
        assert_eq!(doc, json!({"a": [1], "b": {"copy": [1]}}));
    }

    #[test]
    fn test_test_failure_reports_kind() {
        let mut doc = json!({"a": 1});
        let err =
            apply_patch(&mut doc, &patch(r#"[{"op":"test","path":"/a","value":2}]"#)).unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::TestFailed);
        let err =
            apply_patch(&mut doc, &patch(r#"[{"op":"test","path":"/b","value":2}]"#)).unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::TestFailed);
    }

    #[test]
    fn test_missing_parent_mid_path() {
        let mut doc = json!({});
        let err = apply_patch(
            &mut doc,
            &patch(r#"[{"op":"add","path":"/a/b","value":1}]"#),
        )
        .unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::MissingParent);
    }

    #[test]
    fn test_scalar_parent_is_invalid_target() {
        let mut doc = json!({"a": 5});
        let err = apply_patch(
            &mut doc,
            &patch(r#"[{"op":"add","path":"/a/b","value":1}]"#),
        )
        .unwrap_err();
        assert_eq!(err.kind, ApplyErrorKind::InvalidTarget);
    }

    #[test]
    fn test_error_carries_op_index() {
        let mut doc = json!({"a": 1});
        let err = apply_patch(
            &mut doc,
            &patch(
                r#"[
                    {"op": "test", "path": "/a", "value": 1},
                    {"op": "remove", "path": "/missing"}
                ]"#,
            ),
        )
        .unwrap_err();
        assert_eq!(err.op_index, 1);
    }

    #[test]
    fn test_apply_copy_leaves_input_untouched() {
        let doc = json!({"a": 1});
        let out = apply_patch_copy(&doc, &patch(r#"[{"op":"add","path":"/b","value":2}]"#)).unwrap();
        assert_eq!(doc, json!({"a": 1}));
        assert_eq!(out, json!({"a": 1, "b": 2}));
    }
}
