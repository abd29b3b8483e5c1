//! Copy-on-write shadow of the base JSON for sequential compilation.
//!
//! Under sequential semantics every operation resolves against the base as
//! already modified by the operations before it. Cloning the whole document
//! per op would defeat the point, so the shadow is an overlay: untouched
//! subtrees stay borrowed from the base, and only the containers along a
//! written path are expanded one level into owned overlay nodes. Reads see
//! through the overlay transparently.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Container classification, with everything non-container as `Primitive`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShadowKind {
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// null, bool, number or string.
    Primitive,
}

fn value_kind(value: &Value) -> ShadowKind {
    match value {
        Value::Object(_) => ShadowKind::Object,
        Value::Array(_) => ShadowKind::Array,
        _ => ShadowKind::Primitive,
    }
}

/// One node of the copy-on-write overlay.
#[derive(Clone, Debug)]
pub enum Shadow<'a> {
    /// Untouched subtree of the base document.
    Borrowed(&'a Value),
    /// Owned subtree (a value written by the patch).
    Owned(Value),
    /// Expanded object: children resolve individually.
    Obj(BTreeMap<String, Shadow<'a>>),
    /// Expanded array: children resolve individually.
    Arr(Vec<Shadow<'a>>),
}

impl<'a> Shadow<'a> {
    /// Shadow the base document without copying anything.
    pub fn of(base: &'a Value) -> Self {
        Shadow::Borrowed(base)
    }

    /// What this node currently is.
    pub fn kind(&self) -> ShadowKind {
        match self {
            Shadow::Borrowed(v) => value_kind(v),
            Shadow::Owned(v) => value_kind(v),
            Shadow::Obj(_) => ShadowKind::Object,
            Shadow::Arr(_) => ShadowKind::Array,
        }
    }

    /// Read-only child lookup by object key.
    pub fn get_key(&self, key: &str) -> Option<ShadowRef<'_, 'a>> {
        match self {
            Shadow::Borrowed(Value::Object(map)) => map.get(key).map(ShadowRef::Val),
            Shadow::Owned(Value::Object(map)) => map.get(key).map(ShadowRef::Val),
            Shadow::Obj(map) => map.get(key).map(ShadowRef::Node),
            _ => None,
        }
    }

    /// Read-only child lookup by array index.
    pub fn get_index(&self, index: usize) -> Option<ShadowRef<'_, 'a>> {
        match self {
            Shadow::Borrowed(Value::Array(items)) => items.get(index).map(ShadowRef::Val),
            Shadow::Owned(Value::Array(items)) => items.get(index).map(ShadowRef::Val),
            Shadow::Arr(items) => items.get(index).map(ShadowRef::Node),
            _ => None,
        }
    }

    /// Array length, if this is an array.
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Shadow::Borrowed(Value::Array(items)) => Some(items.len()),
            Shadow::Owned(Value::Array(items)) => Some(items.len()),
            Shadow::Arr(items) => Some(items.len()),
            _ => None,
        }
    }

    /// True when this object has `key`.
    pub fn has_key(&self, key: &str) -> bool {
        self.get_key(key).is_some()
    }

    /// Materialize this subtree into an owned value.
    pub fn to_value(&self) -> Value {
        match self {
            Shadow::Borrowed(v) => (*v).clone(),
            Shadow::Owned(v) => v.clone(),
            Shadow::Obj(map) => Value::Object(
                map.iter()
                    .map(|(k, s)| (k.clone(), s.to_value()))
                    .collect::<Map<String, Value>>(),
            ),
            Shadow::Arr(items) => Value::Array(items.iter().map(Shadow::to_value).collect()),
        }
    }

    /// Expand one level so children can be addressed individually. Clones
    /// only this node's spine: children stay borrowed (or move, when the
    /// node was already owned).
    fn expand(&mut self) {
        let expanded = match std::mem::replace(self, Shadow::Owned(Value::Null)) {
            Shadow::Borrowed(Value::Object(map)) => Shadow::Obj(
                map.iter()
                    .map(|(k, v)| (k.clone(), Shadow::Borrowed(v)))
                    .collect(),
            ),
            Shadow::Borrowed(Value::Array(items)) => {
                Shadow::Arr(items.iter().map(Shadow::Borrowed).collect())
            }
            Shadow::Owned(Value::Object(map)) => Shadow::Obj(
                map.into_iter()
                    .map(|(k, v)| (k, Shadow::Owned(v)))
                    .collect(),
            ),
            Shadow::Owned(Value::Array(items)) => {
                Shadow::Arr(items.into_iter().map(Shadow::Owned).collect())
            }
            other => other,
        };
        *self = expanded;
    }

    /// Mutable child lookup, expanding this node on the way.
    pub fn child_mut(&mut self, token: &str, index: Option<usize>) -> Option<&mut Shadow<'a>> {
        self.expand();
        match self {
            Shadow::Obj(map) => map.get_mut(token),
            Shadow::Arr(items) => index.and_then(|i| items.get_mut(i)),
            _ => None,
        }
    }

    /// Replace this node wholesale.
    pub fn set(&mut self, value: Value) {
        *self = Shadow::Owned(value);
    }

    /// Write an object key.
    pub fn obj_set(&mut self, key: &str, value: Value) {
        self.expand();
        if let Shadow::Obj(map) = self {
            map.insert(key.to_string(), Shadow::Owned(value));
        }
    }

    /// Remove an object key.
    pub fn obj_remove(&mut self, key: &str) {
        self.expand();
        if let Shadow::Obj(map) = self {
            map.remove(key);
        }
    }

    /// Insert into an array; `None` appends.
    pub fn arr_insert(&mut self, index: Option<usize>, value: Value) {
        self.expand();
        if let Shadow::Arr(items) = self {
            let at = index.unwrap_or(items.len()).min(items.len());
            items.insert(at, Shadow::Owned(value));
        }
    }

    /// Delete an array element.
    pub fn arr_delete(&mut self, index: usize) {
        self.expand();
        if let Shadow::Arr(items) = self {
            if index < items.len() {
                items.remove(index);
            }
        }
    }

    /// Replace an array element.
    pub fn arr_replace(&mut self, index: usize, value: Value) {
        self.expand();
        if let Shadow::Arr(items) = self {
            if index < items.len() {
                items[index] = Shadow::Owned(value);
            }
        }
    }
}

/// Read cursor over the overlay: either an overlay node or a plain base
/// value reached through a borrowed subtree.
#[derive(Clone, Copy, Debug)]
pub enum ShadowRef<'s, 'a> {
    /// An overlay node.
    Node(&'s Shadow<'a>),
    /// A plain value inside a borrowed or owned subtree.
    Val(&'s Value),
}

impl<'s, 'a> ShadowRef<'s, 'a> {
    /// What the referenced value is.
    pub fn kind(&self) -> ShadowKind {
        match self {
            ShadowRef::Node(s) => s.kind(),
            ShadowRef::Val(v) => value_kind(v),
        }
    }

    /// Child by object key.
    pub fn get_key(&self, key: &str) -> Option<ShadowRef<'s, 'a>> {
        match self {
            ShadowRef::Node(s) => s.get_key(key),
            ShadowRef::Val(Value::Object(map)) => map.get(key).map(ShadowRef::Val),
            _ => None,
        }
    }

    /// Child by array index.
    pub fn get_index(&self, index: usize) -> Option<ShadowRef<'s, 'a>> {
        match self {
            ShadowRef::Node(s) => s.get_index(index),
            ShadowRef::Val(Value::Array(items)) => items.get(index).map(ShadowRef::Val),
            _ => None,
        }
    }

    /// Array length, if an array.
    pub fn array_len(&self) -> Option<usize> {
        match self {
            ShadowRef::Node(s) => s.array_len(),
            ShadowRef::Val(Value::Array(items)) => Some(items.len()),
            _ => None,
        }
    }

    /// True when this object has `key`.
    pub fn has_key(&self, key: &str) -> bool {
        self.get_key(key).is_some()
    }

    /// Materialize the referenced subtree.
    pub fn to_value(&self) -> Value {
        match self {
            ShadowRef::Node(s) => s.to_value(),
            ShadowRef::Val(v) => (*v).clone(),
        }
    }
}
