//! RFC 6902 JSON Patch operations, serialized verbatim.
//!
//! The wire format is the RFC's: `{"op": "...", "path": "...", ...}` with
//! `value` for add/replace/test and `from` for move/copy. Unknown `op` tags
//! are rejected at deserialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON Patch: an ordered list of operations.
pub type Patch = Vec<PatchOp>;

/// One JSON Patch operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Add (or overwrite) the value at `path`.
    Add {
        /// Target location.
        path: String,
        /// Value to add.
        value: Value,
    },
    /// Remove the value at `path`.
    Remove {
        /// Target location.
        path: String,
    },
    /// Replace the existing value at `path`.
    Replace {
        /// Target location.
        path: String,
        /// Replacement value.
        value: Value,
    },
    /// Move the value at `from` to `path`.
    Move {
        /// Source location.
        from: String,
        /// Target location.
        path: String,
    },
    /// Copy the value at `from` to `path`.
    Copy {
        /// Source location.
        from: String,
        /// Target location.
        path: String,
    },
    /// Assert that the value at `path` equals `value`.
    Test {
        /// Target location.
        path: String,
        /// Expected value.
        value: Value,
    },
}

impl PatchOp {
    /// The operation's target path.
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Replace { path, .. }
            | PatchOp::Move { path, .. }
            | PatchOp::Copy { path, .. }
            | PatchOp::Test { path, .. } => path,
        }
    }

    /// The source path of a `move`/`copy`, if any.
    pub fn from(&self) -> Option<&str> {
        match self {
            PatchOp::Move { from, .. } | PatchOp::Copy { from, .. } => Some(from),
            _ => None,
        }
    }

    /// The RFC operation name.
    pub fn op_name(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Remove { .. } => "remove",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Move { .. } => "move",
            PatchOp::Copy { .. } => "copy",
            PatchOp::Test { .. } => "test",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_is_rfc_verbatim() {
        let op = PatchOp::Add {
            path: "/a/b".to_string(),
            value: json!([1, 2]),
        };
        let text = serde_json::to_value(&op).unwrap();
        assert_eq!(text, json!({"op": "add", "path": "/a/b", "value": [1, 2]}));
    }

    #[test]
    fn test_parse_patch_list() {
        let patch: Patch = serde_json::from_str(
            r#"[
                {"op": "test", "path": "/0/name", "value": "Andrew"},
                {"op": "add", "path": "/0/happy", "value": true},
                {"op": "move", "from": "/a", "path": "/b"}
            ]"#,
        )
        .unwrap();
        assert_eq!(patch.len(), 3);
        assert_eq!(patch[0].op_name(), "test");
        assert_eq!(patch[2].from(), Some("/a"));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let result: Result<PatchOp, _> =
            serde_json::from_str(r#"{"op": "merge", "path": "/a"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let result: Result<PatchOp, _> = serde_json::from_str(r#"{"op": "add", "path": "/a"}"#);
        assert!(result.is_err());
        let result: Result<PatchOp, _> = serde_json::from_str(r#"{"op": "move", "path": "/a"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trip() {
        let patch: Patch = vec![
            PatchOp::Remove { path: "/x".into() },
            PatchOp::Copy {
                from: "/a".into(),
                path: "/b".into(),
            },
            PatchOp::Test {
                path: "".into(),
                value: json!(null),
            },
        ];
        let text = serde_json::to_string(&patch).unwrap();
        let back: Patch = serde_json::from_str(&text).unwrap();
        assert_eq!(back, patch);
    }
}
