//! Surface patches and the pointer-addressed patch engine.
//!
//! Patches are a minimal JSON Patch subset: `add` and `replace` at a
//! slash-delimited pointer. Intermediate mappings are created on demand and
//! `"/"` replaces the whole document. Each operation is atomic on its own; a
//! batch is not, so operations preceding a rejected one stay applied.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Patch verb. Verbs the engine does not handle are carried verbatim so
/// newer producers can be relayed without loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PatchOperation {
    Add,
    Replace,
    Other(String),
}

impl PatchOperation {
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Add | Self::Replace)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Other(op) => op,
        }
    }
}

impl From<String> for PatchOperation {
    fn from(op: String) -> Self {
        match op.as_str() {
            "add" => Self::Add,
            "replace" => Self::Replace,
            _ => Self::Other(op),
        }
    }
}

impl From<PatchOperation> for String {
    fn from(op: PatchOperation) -> Self {
        match op {
            PatchOperation::Other(op) => op,
            known => known.as_str().to_owned(),
        }
    }
}

/// One addressed mutation: `{"op":"replace","path":"/status/loading","value":true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOperation,
    pub path: String,
    /// `None` when the field is absent on the wire; an explicit `null` is `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Patch {
    pub fn add(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOperation::Add,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            op: PatchOperation::Replace,
            path: path.into(),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("pointer must start with '/': {0}")]
    InvalidPointer(String),
    #[error("cannot traverse non-mapping at segment '{segment}' for path '{path}'")]
    Traversal { segment: String, path: String },
}

/// A rejected operation and its position in the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFailure {
    pub index: usize,
    pub error: PatchError,
}

/// Outcome of applying one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    /// Operations with an unsupported verb, skipped without error.
    pub ignored: usize,
    pub failures: Vec<PatchFailure>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Apply `patches` in order to `document`, mutating it in place.
///
/// Rejected operations are logged and recorded in the report; the batch
/// carries on with the next operation.
pub fn apply_patches(document: &mut Value, patches: &[Patch]) -> ApplyReport {
    let mut report = ApplyReport::default();
    for (index, patch) in patches.iter().enumerate() {
        if !patch.op.is_supported() {
            report.ignored += 1;
            continue;
        }
        match apply_one(document, patch) {
            Ok(()) => report.applied += 1,
            Err(error) => {
                warn!(index, path = %patch.path, %error, "patch operation rejected");
                report.failures.push(PatchFailure { index, error });
            }
        }
    }
    report
}

fn apply_one(document: &mut Value, patch: &Patch) -> Result<(), PatchError> {
    let segments = pointer_segments(&patch.path)?;
    let value = patch.value.clone().unwrap_or(Value::Null);

    let Some((last, parents)) = segments.split_last() else {
        // Whole-document replace; only a mapping can stand in for the document.
        if let Value::Object(replacement) = value {
            match document {
                Value::Object(map) => {
                    map.clear();
                    map.extend(replacement);
                }
                other => *other = Value::Object(replacement),
            }
        }
        return Ok(());
    };

    check_traversable(document, &segments, &patch.path)?;
    let parent = ensure_parents(document, parents).ok_or_else(|| PatchError::Traversal {
        segment: segments[0].to_owned(),
        path: patch.path.clone(),
    })?;
    parent.insert((*last).to_owned(), value);
    Ok(())
}

fn pointer_segments(path: &str) -> Result<Vec<&str>, PatchError> {
    if !path.starts_with('/') {
        return Err(PatchError::InvalidPointer(path.to_owned()));
    }
    Ok(path.split('/').filter(|seg| !seg.is_empty()).collect())
}

/// Read-only walk that finds the first node which would have to be entered
/// but is not a mapping. Runs before any mutation.
fn check_traversable(document: &Value, segments: &[&str], path: &str) -> Result<(), PatchError> {
    let mut current = document;
    for segment in segments {
        let Value::Object(map) = current else {
            return Err(PatchError::Traversal {
                segment: (*segment).to_owned(),
                path: path.to_owned(),
            });
        };
        match map.get(*segment) {
            Some(child @ Value::Object(_)) => current = child,
            // Missing or scalar children are replaced by fresh mappings.
            _ => return Ok(()),
        }
    }
    Ok(())
}

fn ensure_parents<'a>(
    document: &'a mut Value,
    parents: &[&str],
) -> Option<&'a mut Map<String, Value>> {
    let mut current = document.as_object_mut()?;
    for segment in parents {
        let child = current
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        current = child.as_object_mut()?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(raw: Value) -> Patch {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn add_creates_intermediate_mappings() {
        let mut doc = json!({});
        let report = apply_patches(&mut doc, &[Patch::add("/a/b/c", 1)]);
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
        assert_eq!(report.applied, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn replace_is_idempotent() {
        let p = Patch::replace("/status/loading", true);
        let mut once = json!({"status": {"loading": false}});
        apply_patches(&mut once, std::slice::from_ref(&p));
        let mut twice = once.clone();
        apply_patches(&mut twice, std::slice::from_ref(&p));
        assert_eq!(once, twice);
        assert_eq!(once, json!({"status": {"loading": true}}));
    }

    #[test]
    fn root_pointer_replaces_whole_document() {
        let mut doc = json!({"y": 2});
        apply_patches(&mut doc, &[Patch::replace("/", json!({"x": 1}))]);
        assert_eq!(doc, json!({"x": 1}));
    }

    #[test]
    fn root_pointer_with_non_mapping_value_is_noop() {
        let mut doc = json!({"y": 2});
        let report = apply_patches(&mut doc, &[Patch::replace("/", json!([1, 2]))]);
        assert_eq!(doc, json!({"y": 2}));
        assert!(report.is_clean());
    }

    #[test]
    fn unknown_op_leaves_document_unchanged() {
        let mut doc = json!({"a": 1});
        let report = apply_patches(&mut doc, &[patch(json!({"op": "remove", "path": "/a"}))]);
        assert_eq!(doc, json!({"a": 1}));
        assert_eq!(report.ignored, 1);
        assert_eq!(report.applied, 0);
    }

    #[test]
    fn scalar_intermediate_is_overwritten_by_mapping() {
        let mut doc = json!({"status": "idle"});
        apply_patches(&mut doc, &[Patch::replace("/status/loading", true)]);
        assert_eq!(doc, json!({"status": {"loading": true}}));
    }

    #[test]
    fn non_mapping_root_rejects_op_without_mutation() {
        let mut doc = json!([1, 2, 3]);
        let report = apply_patches(&mut doc, &[Patch::add("/a/b", 1)]);
        assert_eq!(doc, json!([1, 2, 3]));
        assert_eq!(
            report.failures,
            vec![PatchFailure {
                index: 0,
                error: PatchError::Traversal {
                    segment: "a".to_owned(),
                    path: "/a/b".to_owned(),
                },
            }]
        );
    }

    #[test]
    fn batch_is_not_transactional_across_operations() {
        let mut doc = json!({});
        let report = apply_patches(
            &mut doc,
            &[
                Patch::add("/first", 1),
                Patch::add("missing-slash", 2),
                Patch::add("/third", 3),
            ],
        );
        assert_eq!(doc, json!({"first": 1, "third": 3}));
        assert_eq!(report.applied, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert!(matches!(
            report.failures[0].error,
            PatchError::InvalidPointer(_)
        ));
    }

    #[test]
    fn trailing_and_doubled_slashes_are_ignored() {
        let mut doc = json!({});
        apply_patches(&mut doc, &[Patch::add("//a//b/", "v")]);
        assert_eq!(doc, json!({"a": {"b": "v"}}));
    }

    #[test]
    fn missing_value_writes_null() {
        let mut doc = json!({"a": 1});
        apply_patches(&mut doc, &[patch(json!({"op": "add", "path": "/a"}))]);
        assert_eq!(doc, json!({"a": null}));
    }

    #[test]
    fn wire_shape_is_preserved() {
        let explicit_null = patch(json!({"op": "replace", "path": "/a", "value": null}));
        assert_eq!(explicit_null.value, Some(Value::Null));
        assert_eq!(
            serde_json::to_value(&explicit_null).unwrap(),
            json!({"op": "replace", "path": "/a", "value": null})
        );

        let unknown = patch(json!({"op": "move", "path": "/a"}));
        assert_eq!(unknown.op, PatchOperation::Other("move".to_owned()));
        assert_eq!(
            serde_json::to_string(&unknown).unwrap(),
            r#"{"op":"move","path":"/a"}"#
        );
    }
}
